//! Watchpost 엣지 업로드 에이전트
//!
//! 센서 호스트에서 Zeek 스타일 로그 파일(TSV 또는 JSON)을 추적하고,
//! 읽지 않은 라인을 프레임으로 묶어 세션 기반 RPC로 컬렉터에
//! 스트리밍합니다.
//!
//! # 아키텍처
//! ```text
//! Scanner(발견/로테이션) -> ProgressStore(내구 오프셋)
//!        |                        ^
//!        v                        | ACK 후 커밋
//! Frame(파싱/청크) -> UploadClient(Register/Upload/재연결)
//! ```
//!
//! 진행 카운터는 컬렉터가 프레임을 ACK한 뒤에만 커밋되므로,
//! 크래시 시 이미 전송된 청크가 최대 한 번 재전송됩니다.

pub mod client;
pub mod error;
pub mod frame;
pub mod progress;
pub mod scanner;
pub mod zeek;

pub use client::UploadClient;
pub use error::IngestError;
pub use frame::{GeneratedFrame, PendingProgress};
pub use progress::{FileProgress, ProgressDb, ProgressStore};
pub use scanner::{PathMode, Scanner, TRACKED_LOG_FILES};
pub use zeek::ZeekHeader;
