//! 수신 엔드포인트 -- 세션 발급, 프레임 검증, 큐 적재
//!
//! TCP 리스너가 와이어 프로토콜 연결을 수락합니다. 각 연결은 별도
//! 태스크에서 처리되며, Register가 발급한 세션은 해당 연결에서만
//! 유효하고 영속화되지 않습니다.
//!
//! # 검증 계층
//! - 모든 요청 헤더: 비어 있지 않은 메시지 ID, 0이 아닌 타임스탬프,
//!   NULL이 아닌 상태. 위반 시 fault 후 연결 종료.
//! - Upload 세션: 비어 있지 않고 이 연결이 발급한 값과 일치해야 하며,
//!   위반은 NACK이 아닌 fault (연결 수준 에러)입니다.
//! - Upload 내용: 비어 있지 않은 에셋 ID/파일 이름/페이로드. 위반은
//!   설명이 담긴 NACK이며 연결은 유지됩니다.
//!
//! 유효한 프레임은 고정 용량 큐로 전달됩니다. 큐가 가득 차면 send가
//! 블록되어 단일 비행 연결에 backpressure를 가합니다.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchpost_core::config::CollectorConfig;
use watchpost_core::crypto::PayloadCipher;
use watchpost_core::wire::{
    self, Header, RegisterResponse, Status, UploadRequest, UploadResponse, WireMessage,
};

use crate::error::CollectorError;
use crate::pipeline::Frame;

/// 수신 엔드포인트 서버
pub struct CollectorServer {
    listen_addr: String,
    session_timeout_secs: u32,
    queue: mpsc::Sender<Frame>,
    cipher: Option<Arc<PayloadCipher>>,
}

impl CollectorServer {
    /// 설정에서 서버를 생성합니다.
    ///
    /// `shared_key`가 설정되어 있으면 암호화된 프레임을 개봉할 수
    /// 있습니다.
    pub fn new(
        config: &CollectorConfig,
        queue: mpsc::Sender<Frame>,
    ) -> Result<Self, CollectorError> {
        let cipher = if config.shared_key.is_empty() {
            None
        } else {
            Some(Arc::new(PayloadCipher::from_base64_key(
                &config.shared_key,
            )?))
        };
        Ok(Self {
            listen_addr: config.listen_addr.clone(),
            session_timeout_secs: u32::try_from(config.session_timeout_secs).unwrap_or(u32::MAX),
            queue,
            cipher,
        })
    }

    /// 리스너를 바인드하고 연결 수락 루프를 실행합니다.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .map_err(|e| CollectorError::Listener(format!("{}: {}", self.listen_addr, e)))?;
        info!(addr = %self.listen_addr, "ingestion endpoint listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("ingestion endpoint shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| CollectorError::Listener(format!("accept error: {e}")))?;
                    debug!(%peer, "accepted connection");
                    let queue = self.queue.clone();
                    let cipher = self.cipher.clone();
                    let timeout = self.session_timeout_secs;
                    let conn_cancel = cancel.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, queue, cipher, timeout, conn_cancel).await;
                        debug!(%peer, "connection closed");
                    });
                }
            }
        }
    }

    /// 실제 바인드된 주소가 필요한 경우를 위해 리스너를 직접 받는 실행 경로
    pub async fn run_on(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), CollectorError> {
        info!(addr = ?listener.local_addr().ok(), "ingestion endpoint listening");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, _) = accepted
                        .map_err(|e| CollectorError::Listener(format!("accept error: {e}")))?;
                    let queue = self.queue.clone();
                    let cipher = self.cipher.clone();
                    let timeout = self.session_timeout_secs;
                    let conn_cancel = cancel.clone();
                    tokio::spawn(handle_connection(stream, queue, cipher, timeout, conn_cancel));
                }
            }
        }
    }
}

/// 단일 연결을 처리합니다.
///
/// fault를 보낸 뒤에는 연결을 닫습니다. NACK 후에는 연결이 유지됩니다.
async fn handle_connection(
    mut stream: TcpStream,
    queue: mpsc::Sender<Frame>,
    cipher: Option<Arc<PayloadCipher>>,
    session_timeout_secs: u32,
    cancel: CancellationToken,
) {
    // 이 연결이 발급한 세션 — 영속화되지 않음
    let mut session: Option<String> = None;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = wire::read_message(&mut stream) => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(watchpost_core::error::ProtocolError::ConnectionClosed) => {
                debug!("peer closed connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read message, closing connection");
                return;
            }
        };

        match message {
            WireMessage::RegisterRequest(req) => {
                if let Err(reason) = validate_header(&req.header, false) {
                    send_fault(&mut stream, &reason).await;
                    return;
                }
                let new_session = uuid::Uuid::new_v4().to_string();
                info!(session = %new_session, "session registered");
                let response = WireMessage::RegisterResponse(RegisterResponse {
                    header: Header::ack(&new_session),
                    timeout_seconds: session_timeout_secs,
                });
                session = Some(new_session);
                if let Err(e) = wire::write_message(&mut stream, &response).await {
                    warn!(error = %e, "failed to send register response");
                    return;
                }
            }
            WireMessage::UploadRequest(req) => {
                match handle_upload(req, &session, &cipher, &queue, &mut stream).await {
                    UploadOutcome::Continue => {}
                    UploadOutcome::Close => return,
                }
            }
            other => {
                send_fault(&mut stream, &format!("unexpected message: {other:?}")).await;
                return;
            }
        }
    }
}

enum UploadOutcome {
    Continue,
    Close,
}

/// Upload 요청 하나를 검증하고 큐에 적재합니다.
async fn handle_upload(
    req: UploadRequest,
    session: &Option<String>,
    cipher: &Option<Arc<PayloadCipher>>,
    queue: &mpsc::Sender<Frame>,
    stream: &mut TcpStream,
) -> UploadOutcome {
    // 헤더 + 세션 검증 위반은 연결 수준 에러
    if let Err(reason) = validate_header(&req.header, true) {
        send_fault(stream, &reason).await;
        return UploadOutcome::Close;
    }
    if session.as_deref() != Some(req.header.session.as_str()) {
        send_fault(stream, "invalid session").await;
        return UploadOutcome::Close;
    }

    let reply_session = req.header.session.clone();

    // 내용 검증 위반은 NACK (연결 유지)
    if req.asset_id.is_empty() {
        warn!(session = %reply_session, "invalid asset ID provided");
        return send_nack(stream, &reply_session, "Invalid asset ID provided.").await;
    }
    if req.file_name.is_empty() {
        warn!(session = %reply_session, "invalid file name provided");
        return send_nack(stream, &reply_session, "Invalid file name provided.").await;
    }
    if req.payload.is_empty() {
        warn!(session = %reply_session, "empty payload provided");
        return send_nack(stream, &reply_session, "Invalid payload provided.").await;
    }

    // 암호화된 페이로드 개봉
    let payload = if req.header.encrypted {
        let Some(cipher) = cipher else {
            warn!(session = %reply_session, "encrypted payload but no shared key configured");
            return send_nack(stream, &reply_session, "Encrypted payload not supported.").await;
        };
        let mut opened = Vec::with_capacity(req.payload.len());
        for line in &req.payload {
            match cipher.open(line) {
                Ok(plain) => opened.push(plain),
                Err(_) => {
                    warn!(session = %reply_session, "failed to open encrypted payload line");
                    return send_nack(stream, &reply_session, "Invalid encrypted payload.").await;
                }
            }
        }
        opened
    } else {
        req.payload
    };

    metrics::counter!("watchpost_frames_received_total").increment(1);

    // 큐가 가득 차면 여기서 블록 — 단일 비행 연결에 대한 명시적 backpressure
    if queue
        .send(Frame {
            asset_id: req.asset_id,
            file_name: req.file_name,
            payload,
        })
        .await
        .is_err()
    {
        send_fault(stream, "ingestion queue closed").await;
        return UploadOutcome::Close;
    }

    let ack = WireMessage::UploadResponse(UploadResponse {
        header: Header::ack(&reply_session),
    });
    match wire::write_message(stream, &ack).await {
        Ok(()) => UploadOutcome::Continue,
        Err(e) => {
            warn!(error = %e, "failed to send upload ack");
            UploadOutcome::Close
        }
    }
}

/// 요청 헤더를 검증합니다.
///
/// `validate_session`이 true이면 세션 필드도 검증합니다.
pub(crate) fn validate_header(header: &Header, validate_session: bool) -> Result<(), String> {
    if header.msg_uuid.is_empty() {
        return Err("invalid header UUID".to_owned());
    }
    if header.has_zero_timestamp() {
        return Err("invalid header timestamp".to_owned());
    }
    if header.status == Status::Null {
        return Err("invalid header status".to_owned());
    }
    if validate_session && header.session.is_empty() {
        return Err("invalid session".to_owned());
    }
    Ok(())
}

async fn send_fault(stream: &mut TcpStream, reason: &str) {
    warn!(reason, "protocol fault, closing connection");
    let fault = WireMessage::Fault {
        header: Header::fault(reason),
    };
    if let Err(e) = wire::write_message(stream, &fault).await {
        debug!(error = %e, "failed to send fault");
    }
}

async fn send_nack(stream: &mut TcpStream, session: &str, reason: &str) -> UploadOutcome {
    let nack = WireMessage::UploadResponse(UploadResponse {
        header: Header::nack(session, reason),
    });
    match wire::write_message(stream, &nack).await {
        Ok(()) => UploadOutcome::Continue,
        Err(e) => {
            warn!(error = %e, "failed to send nack");
            UploadOutcome::Close
        }
    }
}
