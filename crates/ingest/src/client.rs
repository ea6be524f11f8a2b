//! 전송 클라이언트 -- 세션 등록, 프레임 업로드, 고정 지연 재연결
//!
//! 연결 시도마다: 접속 → Register (빈 세션) → 세션 ID와 광고된 타임아웃
//! 수신 → 업로드 루프와 파일 재폴링 루프를 동시 실행합니다. 전송 에러,
//! fault, NACK이 발생하면 시도별 [`CancellationToken`]으로 재폴링 루프를
//! 중단하고 연결을 닫은 뒤, 고정 `retry_delay` 후 완전히 새로운
//! Register로 재연결합니다 (새 세션).
//!
//! 연결당 미해결 네트워크 호출은 뮤텍스로 하나로 직렬화됩니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchpost_core::crypto::PayloadCipher;
use watchpost_core::wire::{
    self, Header, RegisterRequest, Status, UploadRequest, WireMessage,
};

use crate::error::IngestError;
use crate::scanner::Scanner;

/// 접속 시도 타임아웃
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// 업로드 클라이언트
pub struct UploadClient {
    hostname: String,
    asset_id: String,
    retry_delay: Duration,
    scan_interval: Duration,
    cipher: Option<PayloadCipher>,
    scanner: Arc<Scanner>,
}

impl UploadClient {
    /// 새 업로드 클라이언트를 생성합니다.
    ///
    /// `cipher`가 설정되면 모든 페이로드 라인이 봉인되고 헤더에
    /// `encrypted = true`가 표시됩니다.
    pub fn new(
        hostname: impl Into<String>,
        asset_id: impl Into<String>,
        retry_delay: Duration,
        scan_interval: Duration,
        cipher: Option<PayloadCipher>,
        scanner: Arc<Scanner>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            asset_id: asset_id.into(),
            retry_delay,
            scan_interval,
            cipher,
            scanner,
        }
    }

    /// 취소될 때까지 연결/업로드/재연결 루프를 실행합니다.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.attempt(&cancel).await {
                Ok(()) => return, // 취소로 정상 종료
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_secs = self.retry_delay.as_secs(),
                        "connection attempt failed, retrying"
                    );
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// 단일 연결 시도: 등록 후 업로드 루프를 실행합니다.
    async fn attempt(&self, cancel: &CancellationToken) -> Result<(), IngestError> {
        info!(endpoint = %self.hostname, "attempting connection");
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.hostname))
            .await
            .map_err(|_| IngestError::Timeout(format!("dial {}", self.hostname)))??;

        // 자기 등록 (세션 없이)
        let register = WireMessage::RegisterRequest(RegisterRequest {
            header: Header::request(""),
        });
        wire::write_message(&mut stream, &register).await?;
        let (session, timeout_seconds) = match wire::read_message(&mut stream).await? {
            WireMessage::RegisterResponse(resp) if resp.header.status == Status::Ack => {
                (resp.header.session, resp.timeout_seconds)
            }
            WireMessage::RegisterResponse(resp) => {
                return Err(watchpost_core::error::ProtocolError::Nack(resp.header.error_msg).into());
            }
            WireMessage::Fault { header } => {
                return Err(watchpost_core::error::ProtocolError::Fault(header.error_msg).into());
            }
            other => {
                return Err(watchpost_core::error::ProtocolError::UnexpectedMessage(format!(
                    "{other:?}"
                ))
                .into());
            }
        };
        info!(session = %session, timeout_seconds, "successful registration");

        // 연결 시도마다 새로 만드는 취소 토큰 — 업로드 실패 시 재폴링 중단
        let attempt_cancel = cancel.child_token();
        let repoll = tokio::spawn(repoll_loop(
            Arc::clone(&self.scanner),
            self.scan_interval,
            attempt_cancel.clone(),
        ));

        let call_timeout = Duration::from_secs(u64::from(timeout_seconds.max(1)));
        let conn = Mutex::new(stream);
        let result = self
            .upload_loop(&conn, &session, call_timeout, &attempt_cancel)
            .await;

        attempt_cancel.cancel();
        let _ = repoll.await;
        result
    }

    /// 프레임을 하나씩 업로드하고, ACK 후에만 진행 카운터를 커밋합니다.
    async fn upload_loop(
        &self,
        conn: &Mutex<TcpStream>,
        session: &str,
        call_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        loop {
            let Some(frame) = self.scanner.next_frame(cancel).await else {
                return Ok(()); // 취소됨
            };

            let payload = self.seal_payload(frame.payload)?;
            let request = WireMessage::UploadRequest(UploadRequest {
                header: Header::request(session).with_encrypted(self.cipher.is_some()),
                asset_id: self.asset_id.clone(),
                file_name: frame.file_name.clone(),
                payload,
            });

            // 연결당 단일 미해결 호출
            let response = {
                let mut guard = conn.lock().await;
                wire::write_message(&mut *guard, &request).await?;
                tokio::time::timeout(call_timeout, wire::read_message(&mut *guard))
                    .await
                    .map_err(|_| IngestError::Timeout("upload call".to_owned()))??
            };

            match response {
                WireMessage::UploadResponse(resp) if resp.header.status == Status::Ack => {
                    self.scanner.commit_progress(&frame.pending).await?;
                    metrics::counter!("watchpost_agent_frames_uploaded_total").increment(1);
                    debug!(
                        file = %frame.file_name,
                        lines = frame.pending.lines,
                        "frame accepted"
                    );
                }
                WireMessage::UploadResponse(resp) => {
                    return Err(
                        watchpost_core::error::ProtocolError::Nack(resp.header.error_msg).into(),
                    );
                }
                WireMessage::Fault { header } => {
                    return Err(
                        watchpost_core::error::ProtocolError::Fault(header.error_msg).into()
                    );
                }
                other => {
                    return Err(watchpost_core::error::ProtocolError::UnexpectedMessage(
                        format!("{other:?}"),
                    )
                    .into());
                }
            }
        }
    }

    /// 암호화가 켜진 경우 모든 페이로드 라인을 봉인합니다.
    fn seal_payload(&self, payload: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, IngestError> {
        match &self.cipher {
            None => Ok(payload),
            Some(cipher) => payload
                .iter()
                .map(|line| cipher.seal(line).map_err(IngestError::from))
                .collect(),
        }
    }
}

/// 파일 시스템을 주기적으로 재동기화하는 루프 (업로드 루프와 독립)
async fn repoll_loop(scanner: Arc<Scanner>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = scanner.sync().await {
                    warn!(error = %e, "periodic file sync failed");
                }
            }
        }
    }
}
