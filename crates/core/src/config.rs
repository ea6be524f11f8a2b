//! 설정 관리 — watchpost.toml 파싱 및 런타임 설정
//!
//! [`WatchpostConfig`]는 에이전트와 컬렉터 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`WATCHPOST_AGENT_HOSTNAME=host:4850` 형식)
//! 3. 설정 파일 (`watchpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), watchpost_core::error::WatchpostError> {
//! use watchpost_core::config::WatchpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = WatchpostConfig::load("watchpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = WatchpostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, WatchpostError};

/// Watchpost 통합 설정
///
/// `watchpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 에이전트와 컬렉터는 각자 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 업로드 에이전트 설정
    #[serde(default)]
    pub agent: AgentConfig,
    /// 컬렉터 서버 설정
    #[serde(default)]
    pub collector: CollectorConfig,
    /// 레코드 보강 설정
    #[serde(default)]
    pub enrich: EnrichConfig,
    /// IP 평판 세트 설정
    #[serde(default)]
    pub reputation: ReputationConfig,
}

impl WatchpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WatchpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WatchpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WatchpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                WatchpostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, WatchpostError> {
        toml::from_str(toml_str).map_err(|e| {
            WatchpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `WATCHPOST_{SECTION}_{FIELD}`
    /// 예: `WATCHPOST_COLLECTOR_LISTEN_ADDR=0.0.0.0:4850`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "WATCHPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "WATCHPOST_GENERAL_LOG_FORMAT");

        // Agent
        override_string(&mut self.agent.hostname, "WATCHPOST_AGENT_HOSTNAME");
        override_string(&mut self.agent.asset_id, "WATCHPOST_AGENT_ASSET_ID");
        override_string(&mut self.agent.state_file, "WATCHPOST_AGENT_STATE_FILE");
        override_usize(&mut self.agent.chunk_size, "WATCHPOST_AGENT_CHUNK_SIZE");
        override_u64(
            &mut self.agent.retry_delay_secs,
            "WATCHPOST_AGENT_RETRY_DELAY_SECS",
        );
        override_u64(
            &mut self.agent.scan_interval_secs,
            "WATCHPOST_AGENT_SCAN_INTERVAL_SECS",
        );
        override_u64(
            &mut self.agent.idle_sleep_secs,
            "WATCHPOST_AGENT_IDLE_SLEEP_SECS",
        );
        override_bool(&mut self.agent.encrypt, "WATCHPOST_AGENT_ENCRYPT");
        override_string(&mut self.agent.shared_key, "WATCHPOST_AGENT_SHARED_KEY");

        // Collector
        override_string(
            &mut self.collector.listen_addr,
            "WATCHPOST_COLLECTOR_LISTEN_ADDR",
        );
        override_usize(
            &mut self.collector.queue_capacity,
            "WATCHPOST_COLLECTOR_QUEUE_CAPACITY",
        );
        override_u64(
            &mut self.collector.session_timeout_secs,
            "WATCHPOST_COLLECTOR_SESSION_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.collector.max_index_size,
            "WATCHPOST_COLLECTOR_MAX_INDEX_SIZE",
        );
        override_string(
            &mut self.collector.shared_key,
            "WATCHPOST_COLLECTOR_SHARED_KEY",
        );
        override_string(
            &mut self.collector.metrics_bind,
            "WATCHPOST_COLLECTOR_METRICS_BIND",
        );

        // Enrich
        override_string(
            &mut self.enrich.source_ip_field,
            "WATCHPOST_ENRICH_SOURCE_IP_FIELD",
        );
        override_string(
            &mut self.enrich.dest_ip_field,
            "WATCHPOST_ENRICH_DEST_IP_FIELD",
        );

        // Reputation
        override_bool(&mut self.reputation.enabled, "WATCHPOST_REPUTATION_ENABLED");
        override_u64(
            &mut self.reputation.refresh_interval_secs,
            "WATCHPOST_REPUTATION_REFRESH_INTERVAL_SECS",
        );
        override_string(
            &mut self.reputation.probe_url,
            "WATCHPOST_REPUTATION_PROBE_URL",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), WatchpostError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // asset_id 검증 (설정된 경우에만)
        if !self.agent.asset_id.is_empty()
            && !self
                .agent
                .asset_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidValue {
                field: "agent.asset_id".to_owned(),
                reason: "only alphanumeric characters, no spaces".to_owned(),
            }
            .into());
        }

        if self.agent.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.chunk_size".to_owned(),
                reason: "must be greater than zero".to_owned(),
            }
            .into());
        }

        if self.collector.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.queue_capacity".to_owned(),
                reason: "must be greater than zero".to_owned(),
            }
            .into());
        }

        if self.collector.max_index_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collector.max_index_size".to_owned(),
                reason: "must be greater than zero".to_owned(),
            }
            .into());
        }

        if self.collector.listen_addr.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "collector.listen_addr".to_owned(),
                reason: "listen address must not be empty".to_owned(),
            }
            .into());
        }

        if self.enrich.source_ip_field.is_empty() || self.enrich.dest_ip_field.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "enrich.source_ip_field".to_owned(),
                reason: "IP field names must not be empty".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 업로드 에이전트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// 컬렉터 호스트명과 포트 (예: "collector.internal:4850")
    pub hostname: String,
    /// 에셋(네트워크 탭) 식별자 — 영숫자만 허용
    pub asset_id: String,
    /// 로컬 진행 상태 파일 경로
    pub state_file: String,
    /// 프레임당 최대 라인 수
    pub chunk_size: usize,
    /// 재연결 전 대기 시간 (초)
    pub retry_delay_secs: u64,
    /// 파일 시스템 재스캔 주기 (초)
    pub scan_interval_secs: u64,
    /// 업로드할 데이터가 없을 때 대기 시간 (초)
    pub idle_sleep_secs: u64,
    /// 페이로드 암호화 사용 여부
    pub encrypt: bool,
    /// 공유 암호화 키 (base64, 32바이트)
    pub shared_key: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            asset_id: String::new(),
            state_file: ".watchpost-agent-v1.json".to_owned(),
            chunk_size: 10,
            retry_delay_secs: 5,
            scan_interval_secs: 5,
            idle_sleep_secs: 5,
            encrypt: false,
            shared_key: String::new(),
        }
    }
}

/// 컬렉터 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// 수신 주소 (예: "0.0.0.0:4850")
    pub listen_addr: String,
    /// 수신 프레임 큐 용량 (가득 차면 backpressure)
    pub queue_capacity: usize,
    /// Register 응답에 광고되는 타임아웃 (초)
    pub session_timeout_secs: u64,
    /// 인덱스당 최대 문서 수 (초과 시 다음 접미사로 회전)
    pub max_index_size: u64,
    /// 공유 복호화 키 (base64, 32바이트)
    pub shared_key: String,
    /// Prometheus 메트릭 수신 주소 (빈 문자열이면 비활성)
    pub metrics_bind: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4850".to_owned(),
            queue_capacity: 4096,
            session_timeout_secs: 15,
            max_index_size: 1_000_000,
            shared_key: String::new(),
            metrics_bind: String::new(),
        }
    }
}

/// 레코드 보강 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// 출발지 IP 필드명
    pub source_ip_field: String,
    /// 목적지 IP 필드명
    pub dest_ip_field: String,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            source_ip_field: "id_orig_h".to_owned(),
            dest_ip_field: "id_resp_h".to_owned(),
        }
    }
}

/// IP 평판 세트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// 평판 세트 갱신 활성화 여부
    pub enabled: bool,
    /// 갱신 주기 (초)
    pub refresh_interval_secs: u64,
    /// 초기 로드 전 연결성 확인용 URL
    pub probe_url: String,
    /// 세트 이름 → 소스 URL 매핑
    pub sets: HashMap<String, String>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 3600,
            probe_url: "https://www.google.com/".to_owned(),
            sets: HashMap::new(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
