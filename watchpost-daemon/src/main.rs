mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use watchpost_collector::{
    CollectorServer, Consumer, Enricher, IndexRouter, IpSetManager, MemoryStorage,
    ReputationRefresher, StaticGeoIp, Storage,
};
use watchpost_core::config::WatchpostConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::DaemonArgs::parse();

    // 설정 로드 (파일이 없으면 기본값 + 환경변수 오버라이드)
    let config = if args.config.exists() {
        WatchpostConfig::load(&args.config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?
    } else {
        let mut config = WatchpostConfig::default();
        config.apply_env_overrides();
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;
        config
    };

    logging::init_tracing(&config.general)?;
    tracing::info!(config = %args.config.display(), "watchpost-daemon starting");

    // Prometheus 메트릭 익스포터 (설정된 경우)
    if !config.collector.metrics_bind.is_empty() {
        let addr: std::net::SocketAddr = config
            .collector
            .metrics_bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid metrics_bind address: {}", e))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("failed to install metrics exporter: {}", e))?;
        tracing::info!(addr = %addr, "metrics exporter listening");
    }

    let cancel = CancellationToken::new();

    // 외부 협력자 — 실제 클라이언트는 범위 밖, 좁은 인터페이스 구현만 연결
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let geoip = Arc::new(StaticGeoIp::new());
    let reputation = Arc::new(IpSetManager::new());

    // 평판 세트 갱신 스케줄러
    if config.reputation.enabled && !config.reputation.sets.is_empty() {
        let refresher = ReputationRefresher::new(
            Arc::clone(&reputation),
            config.reputation.sets.clone(),
            Duration::from_secs(config.reputation.refresh_interval_secs),
            config.reputation.probe_url.clone(),
        )
        .map_err(|e| anyhow::anyhow!("failed to build reputation refresher: {}", e))?;
        let refresher_cancel = cancel.clone();
        tokio::spawn(async move { refresher.run(refresher_cancel).await });
        tracing::info!(
            sets = config.reputation.sets.len(),
            interval_secs = config.reputation.refresh_interval_secs,
            "reputation refresher scheduled"
        );
    }

    // 보강 + 인덱스 라우팅 + 단일 소비자
    let enricher = Enricher::new(geoip, Arc::clone(&reputation), &config.enrich);
    let router = IndexRouter::new(Arc::clone(&storage), config.collector.max_index_size);
    let consumer = Consumer::new(enricher, router, Arc::clone(&storage));

    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(config.collector.queue_capacity);
    let consumer_handle = tokio::spawn(consumer.run(frame_rx, cancel.clone()));
    tracing::info!(
        queue_capacity = config.collector.queue_capacity,
        max_index_size = config.collector.max_index_size,
        "ingestion pipeline initialized"
    );

    // 수신 엔드포인트
    let server = CollectorServer::new(&config.collector, frame_tx)
        .map_err(|e| anyhow::anyhow!("failed to build collector server: {}", e))?;
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_cancel).await {
            tracing::error!(error = %e, "ingestion endpoint failed");
        }
    });

    // 종료 시그널 대기
    tracing::info!("watchpost-daemon running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    // 우아한 종료
    cancel.cancel();
    let _ = server_handle.await;
    let _ = consumer_handle.await;

    tracing::info!("watchpost-daemon shut down");
    Ok(())
}
