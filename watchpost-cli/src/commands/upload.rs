//! `watchpost upload` command handler

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use watchpost_core::config::WatchpostConfig;
use watchpost_core::crypto::PayloadCipher;
use watchpost_ingest::{ProgressStore, Scanner, UploadClient};

use crate::cli::UploadArgs;
use crate::error::CliError;

/// Execute the `upload` command.
///
/// Validates arguments, synchronizes the local state file, then runs the
/// connect/upload/reconnect loop until interrupted.
pub async fn execute(args: UploadArgs, config_path: &Path) -> Result<(), CliError> {
    let config = effective_config(&args, config_path).await?;

    // hostname and asset id are mandatory for streaming
    if config.agent.hostname.is_empty() {
        return Err(CliError::InvalidArgument(
            "must provide hostname of collector backend".to_owned(),
        ));
    }
    if config.agent.asset_id.is_empty()
        || !config
            .agent
            .asset_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
    {
        return Err(CliError::InvalidArgument(
            "must provide unique asset (network tap) identifier, only alphanumeric characters, no spaces"
                .to_owned(),
        ));
    }

    // 로컬 상태 로드 + 에셋/키 기록
    let mut store = ProgressStore::load(&config.agent.state_file).await;
    let stored_key = store.db().shared_key.clone();
    let shared_key = if config.agent.shared_key.is_empty() {
        stored_key
    } else {
        config.agent.shared_key.clone()
    };
    {
        let db = store.db_mut();
        if !db.asset_id.is_empty() && db.asset_id != config.agent.asset_id {
            warn!(
                previous = %db.asset_id,
                current = %config.agent.asset_id,
                "asset id changed since last run"
            );
        }
        db.asset_id = config.agent.asset_id.clone();
        db.shared_key = shared_key.clone();
    }
    store.commit().await.map_err(CliError::Upload)?;

    let cipher = if config.agent.encrypt {
        if shared_key.is_empty() {
            return Err(CliError::InvalidArgument(
                "--encrypt requires a shared key (--key or state file)".to_owned(),
            ));
        }
        Some(
            PayloadCipher::from_base64_key(&shared_key)
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?,
        )
    } else {
        None
    };

    let scanner = Arc::new(
        Scanner::new(
            &args.path,
            config.agent.chunk_size,
            Duration::from_secs(config.agent.idle_sleep_secs),
            Arc::new(Mutex::new(store)),
        )
        .await
        .map_err(CliError::Upload)?,
    );

    // 초기 동기화로 상태 파일 생성/갱신
    scanner.sync().await.map_err(CliError::Upload)?;

    info!(
        path = %args.path.display(),
        hostname = %config.agent.hostname,
        asset = %config.agent.asset_id,
        encrypt = config.agent.encrypt,
        "starting upload agent"
    );

    let client = UploadClient::new(
        config.agent.hostname.clone(),
        config.agent.asset_id.clone(),
        Duration::from_secs(config.agent.retry_delay_secs),
        Duration::from_secs(config.agent.scan_interval_secs),
        cipher,
        scanner,
    );

    let cancel = CancellationToken::new();
    tokio::select! {
        _ = client.run(cancel.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    }

    Ok(())
}

/// Merge config file, env overrides, and CLI flags (CLI wins).
async fn effective_config(args: &UploadArgs, config_path: &Path) -> Result<WatchpostConfig, CliError> {
    let mut config = if config_path.exists() {
        WatchpostConfig::from_file(config_path)
            .await
            .map_err(|e| CliError::Config(e.to_string()))?
    } else {
        WatchpostConfig::default()
    };
    config.apply_env_overrides();

    if let Some(hostname) = &args.hostname {
        config.agent.hostname = hostname.clone();
    }
    if let Some(asset) = &args.asset {
        config.agent.asset_id = asset.clone();
    }
    if let Some(delay) = args.delay {
        config.agent.retry_delay_secs = delay;
    }
    if let Some(scan) = args.scan {
        config.agent.scan_interval_secs = scan;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.agent.chunk_size = chunk_size;
    }
    if args.encrypt {
        config.agent.encrypt = true;
    }
    if let Some(key) = &args.key {
        config.agent.shared_key = key.clone();
    }
    if let Some(state_file) = &args.state_file {
        config.agent.state_file = state_file.display().to_string();
    }

    config
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;
    Ok(config)
}
