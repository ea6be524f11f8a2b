//! 에러 타입 — 도메인별 에러 정의

/// Watchpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum WatchpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 와이어 프로토콜 에러
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 와이어 프로토콜 에러
///
/// 프레임 인코딩/디코딩과 헤더 검증 실패를 표현합니다.
/// [`ProtocolError::Fault`]는 연결 수준 에러로, NACK 응답과 구분됩니다.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 헤더 검증 실패 (연결 수준 에러)
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// 프레임 크기 초과
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 메시지 직렬화/역직렬화 실패
    #[error("codec error: {0}")]
    Codec(String),

    /// 예상하지 못한 메시지 유형 수신
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// 서버가 연결 수준 fault를 반환함
    #[error("server fault: {0}")]
    Fault(String),

    /// 서버가 NACK 응답을 반환함
    #[error("server nack: {0}")]
    Nack(String),

    /// 상대방이 연결을 종료함
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 인덱스 생성 실패
    #[error("index create failed: {index}: {reason}")]
    IndexCreate { index: String, reason: String },

    /// 문서 색인 실패
    #[error("document index failed: {index}: {reason}")]
    DocumentIndex { index: String, reason: String },

    /// 쿼리 실패
    #[error("query failed: {0}")]
    Query(String),
}
