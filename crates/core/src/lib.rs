//! Watchpost 공통 크레이트 — 설정, 에러, 와이어 프로토콜
//!
//! 에이전트([`watchpost-ingest`])와 컬렉터([`watchpost-collector`])가
//! 공유하는 타입을 정의합니다. 두 프로세스는 이 크레이트의
//! [`wire`] 모듈이 정의한 세션 기반 RPC로 통신합니다.

pub mod config;
pub mod crypto;
pub mod error;
pub mod wire;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, PipelineError, ProtocolError, StorageError, WatchpostError};

// 설정
pub use config::WatchpostConfig;

// 와이어 프로토콜
pub use wire::{
    Header, RegisterRequest, RegisterResponse, Status, UploadRequest, UploadResponse, WireMessage,
};
