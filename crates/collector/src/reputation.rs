//! 평판 세트 갱신 스케줄러 -- 소스 URL 주기 fetch와 전체 교체
//!
//! 고정 주기로 각 세트의 소스 URL을 가져오고, 시작 시 한 번 즉시
//! 로드합니다. 초기 로드는 외부 호스트에 대한 연결성 probe로 게이트되어
//! 오프라인 환경에서 수 분의 지연을 피합니다 (주기 갱신은 계속 시도).
//!
//! 단일 소스 fetch라도 실패하면 교체 전에 전체 리로드를 중단하며,
//! 이전 매핑이 계속 유효합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CollectorError;
use crate::ipset::IpSetManager;

/// 소스 fetch 타임아웃
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// 연결성 probe 타임아웃
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// 평판 세트 갱신기
pub struct ReputationRefresher {
    manager: Arc<IpSetManager>,
    sources: HashMap<String, String>,
    interval: Duration,
    probe_url: String,
    http: reqwest::Client,
}

impl ReputationRefresher {
    /// 새 갱신기를 생성합니다.
    pub fn new(
        manager: Arc<IpSetManager>,
        sources: HashMap<String, String>,
        interval: Duration,
        probe_url: impl Into<String>,
    ) -> Result<Self, CollectorError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| CollectorError::HttpClient(e.to_string()))?;
        Ok(Self {
            manager,
            sources,
            interval,
            probe_url: probe_url.into(),
            http,
        })
    }

    /// 갱신 루프를 실행합니다: probe 게이트 → 초기 로드 → 주기 갱신.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.sources.is_empty() {
            info!("no reputation sources configured, refresher idle");
            return;
        }

        // 초기 로드는 연결성 probe로 게이트 (오프라인 시 전체 건너뜀)
        if self.probe().await {
            info!("connectivity probe succeeded, loading reputation sets");
            if let Err(e) = self.refresh_once().await {
                warn!(error = %e, "initial reputation load failed");
            }
        } else {
            warn!(probe_url = %self.probe_url, "connectivity probe failed, skipping initial reputation load");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.refresh_once().await {
                        warn!(error = %e, "scheduled reputation refresh failed, keeping previous sets");
                    }
                }
            }
        }
    }

    /// 모든 소스를 가져와 세트를 원자적으로 교체합니다.
    ///
    /// 하나의 소스라도 실패하면 교체 없이 에러를 반환합니다.
    pub async fn refresh_once(&self) -> Result<(), CollectorError> {
        let started = std::time::Instant::now();
        let mut loaded = HashMap::with_capacity(self.sources.len());

        for (name, url) in &self.sources {
            let body = self
                .http
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| CollectorError::ReputationFetch {
                    name: name.clone(),
                    reason: e.to_string(),
                })?
                .text()
                .await
                .map_err(|e| CollectorError::ReputationFetch {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            loaded.insert(name.clone(), parse_ip_list(&body));
        }

        let entries: usize = loaded.values().map(Vec::len).sum();
        self.manager.reload(loaded);
        info!(
            sets = self.sources.len(),
            entries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reputation sets reloaded"
        );
        metrics::counter!("watchpost_reputation_reloads_total").increment(1);
        Ok(())
    }

    /// 수동 리로드를 비동기로 실행합니다 (설정 변경 후 등).
    pub fn spawn_manual_refresh(self: &Arc<Self>) {
        let refresher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = refresher.refresh_once().await {
                warn!(error = %e, "manual reputation refresh failed");
            }
        });
    }

    /// 알려진 외부 호스트에 대한 연결성 probe.
    async fn probe(&self) -> bool {
        match tokio::time::timeout(PROBE_TIMEOUT, self.http.get(&self.probe_url).send()).await {
            Ok(Ok(_)) => true,
            _ => false,
        }
    }
}

/// 개행으로 구분된 IP/CIDR 목록을 파싱합니다. `#` 주석과 빈 줄은 무시합니다.
pub fn parse_ip_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}
