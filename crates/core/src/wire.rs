//! 와이어 프로토콜 — 세션 기반 업로드 RPC 메시지 정의
//!
//! 에이전트와 컬렉터는 TCP 위에서 길이 접두사(u32 big-endian) + JSON 본문
//! 형태의 메시지를 교환합니다.
//!
//! # 메시지 흐름
//! ```text
//! agent                      collector
//!   | -- register_request  --> |   (세션 발급)
//!   | <-- register_response -- |
//!   | -- upload_request    --> |   (프레임 검증 + 큐 적재)
//!   | <-- upload_response  --- |   (ACK | NACK)
//!   | <-- fault ------------- |   (연결 수준 에러, 이후 연결 종료)
//! ```
//!
//! [`WireMessage::Fault`]는 NACK과 구분되는 연결 수준 에러입니다.
//! NACK은 연결을 유지하지만 fault 이후에는 연결이 닫힙니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// 단일 메시지 최대 크기 (바이트)
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024; // 8MB

/// 메시지 상태 코드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// 상태 없음 (유효하지 않은 요청)
    #[default]
    Null,
    /// 클라이언트 요청
    Request,
    /// 요청 수락
    Ack,
    /// 요청 거부 (연결 유지)
    Nack,
}

/// 모든 메시지에 포함되는 공통 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// 메시지 고유 ID (UUID v4)
    pub msg_uuid: String,
    /// 메시지 생성 시각
    pub msg_timestamp: DateTime<Utc>,
    /// 메시지 상태
    pub status: Status,
    /// 에러 메시지 (NACK과 함께 사용)
    pub error_msg: String,
    /// 연결 세션 ID — Register가 발급하며 해당 연결에서만 유효합니다
    pub session: String,
    /// 페이로드 암호화 여부
    pub encrypted: bool,
}

impl Header {
    /// 요청 헤더를 생성합니다.
    pub fn request(session: impl Into<String>) -> Self {
        Self {
            msg_uuid: uuid::Uuid::new_v4().to_string(),
            msg_timestamp: Utc::now(),
            status: Status::Request,
            error_msg: String::new(),
            session: session.into(),
            encrypted: false,
        }
    }

    /// ACK 응답 헤더를 생성합니다.
    pub fn ack(session: impl Into<String>) -> Self {
        Self {
            msg_uuid: uuid::Uuid::new_v4().to_string(),
            msg_timestamp: Utc::now(),
            status: Status::Ack,
            error_msg: String::new(),
            session: session.into(),
            encrypted: false,
        }
    }

    /// NACK 응답 헤더를 생성합니다.
    pub fn nack(session: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            msg_uuid: uuid::Uuid::new_v4().to_string(),
            msg_timestamp: Utc::now(),
            status: Status::Nack,
            error_msg: error_msg.into(),
            session: session.into(),
            encrypted: false,
        }
    }

    /// 연결 수준 fault 헤더를 생성합니다.
    pub fn fault(error_msg: impl Into<String>) -> Self {
        Self {
            msg_uuid: uuid::Uuid::new_v4().to_string(),
            msg_timestamp: Utc::now(),
            status: Status::Null,
            error_msg: error_msg.into(),
            session: String::new(),
            encrypted: false,
        }
    }

    /// 암호화 플래그를 설정합니다.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// 타임스탬프가 설정되지 않았는지 (epoch 0) 확인합니다.
    pub fn has_zero_timestamp(&self) -> bool {
        self.msg_timestamp == DateTime::<Utc>::UNIX_EPOCH
    }
}

/// 세션 등록 요청 (세션 필드는 비어 있어야 함)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// 공통 헤더
    pub header: Header,
}

/// 세션 등록 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// 공통 헤더 (ACK + 새 세션)
    pub header: Header,
    /// 서버가 광고하는 호출 타임아웃 (초)
    pub timeout_seconds: u32,
}

/// 프레임 업로드 요청
///
/// 하나의 프레임은 단일 파일에서 읽은 순서 있는 라인 목록입니다.
/// 프레임은 절대로 두 파일에 걸치지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    /// 공통 헤더 (세션 필수)
    pub header: Header,
    /// 에셋 식별자
    pub asset_id: String,
    /// 페이로드가 속한 파일 이름
    pub file_name: String,
    /// JSON 바이트 라인 목록 (와이어에서는 base64 문자열)
    #[serde(with = "payload_b64")]
    pub payload: Vec<Vec<u8>>,
}

/// 프레임 업로드 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// 공통 헤더 (ACK | NACK)
    pub header: Header,
}

/// 와이어 메시지 외피
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireMessage {
    /// 세션 등록 요청
    RegisterRequest(RegisterRequest),
    /// 세션 등록 응답
    RegisterResponse(RegisterResponse),
    /// 프레임 업로드 요청
    UploadRequest(UploadRequest),
    /// 프레임 업로드 응답
    UploadResponse(UploadResponse),
    /// 연결 수준 에러 — 전송 후 연결이 닫힙니다
    Fault {
        /// 에러 내용을 담은 헤더
        header: Header,
    },
}

/// 메시지를 길이 접두사 형식으로 기록합니다.
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(msg).map_err(|e| ProtocolError::Codec(e.to_string()))?;
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: body.len(),
        max: MAX_MESSAGE_BYTES,
    })?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    Ok(())
}

/// 길이 접두사 형식의 메시지 하나를 읽습니다.
///
/// 상대방이 연결을 닫으면 [`ProtocolError::ConnectionClosed`]를 반환합니다.
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Codec(e.to_string())
        }
    })?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_MESSAGE_BYTES,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Codec(e.to_string())
        }
    })?;
    serde_json::from_slice(&body).map_err(|e| ProtocolError::Codec(e.to_string()))
}

/// 페이로드 라인을 base64 문자열 배열로 직렬화하는 serde 헬퍼
mod payload_b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(payload: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(payload.iter().map(|line| STANDARD.encode(line)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|line| STANDARD.decode(line).map_err(D::Error::custom))
            .collect()
    }
}
