//! 업로드 에이전트 에러 타입
//!
//! [`IngestError`]는 에이전트 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<IngestError> for WatchpostError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use watchpost_core::error::{PipelineError, ProtocolError, WatchpostError};

/// 업로드 에이전트 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// 제공된 파일 또는 디렉토리를 찾을 수 없음
    #[error("file or directory not found or insufficient permissions: {path}")]
    PathNotFound {
        /// 문제가 된 경로
        path: String,
    },

    /// 파일 시스템 읽기 실패
    #[error("failed to read file system: {path}: {reason}")]
    FileRead {
        /// 문제가 된 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 로컬 상태 파일 저장 실패
    #[error("failed to save local state: {reason}")]
    StateSave {
        /// 실패 사유
        reason: String,
    },

    /// 유효하지 않은 JSON 라인
    #[error("malformed JSON line")]
    BadJson,

    /// 유효하지 않은 TSV 라인
    #[error("malformed TSV line: {0}")]
    BadTsv(String),

    /// 페이로드 암호화 실패
    #[error("crypto error: {0}")]
    Crypto(#[from] watchpost_core::crypto::CryptoError),

    /// 전송 계층 에러 (연결, 코덱, fault, NACK)
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),

    /// 네트워크 호출 시간 초과
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for WatchpostError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Transport(e) => WatchpostError::Protocol(e),
            IngestError::Io(e) => WatchpostError::Io(e),
            other => WatchpostError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
