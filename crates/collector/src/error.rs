//! 컬렉터 에러 타입

use watchpost_core::error::{PipelineError, ProtocolError, StorageError, WatchpostError};

/// 컬렉터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 리스너 바인드/수락 실패
    #[error("listener error: {0}")]
    Listener(String),

    /// 수신 큐 에러
    #[error("queue error: {0}")]
    Queue(String),

    /// 평판 소스 조회 실패
    #[error("reputation source error: {name}: {reason}")]
    ReputationFetch {
        /// 세트 이름
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// HTTP 클라이언트 초기화 실패
    #[error("http client error: {0}")]
    HttpClient(String),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 페이로드 복호화 에러
    #[error("crypto error: {0}")]
    Crypto(#[from] watchpost_core::crypto::CryptoError),

    /// 프로토콜 에러
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CollectorError> for WatchpostError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Storage(e) => WatchpostError::Storage(e),
            CollectorError::Protocol(e) => WatchpostError::Protocol(e),
            CollectorError::Io(e) => WatchpostError::Io(e),
            other => WatchpostError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
