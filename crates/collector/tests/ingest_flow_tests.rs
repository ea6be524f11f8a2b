//! 수신 엔드포인트 통합 테스트
//!
//! 실제 TCP 연결로 등록/업로드/검증/큐/소비자/색인의 전체 흐름을
//! 검증합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use watchpost_collector::{
    CollectorServer, Consumer, Enricher, IndexRouter, IpSetManager, MemoryStorage, StaticGeoIp,
    Storage,
};
use watchpost_core::config::{CollectorConfig, EnrichConfig};
use watchpost_core::crypto::PayloadCipher;
use watchpost_core::wire::{
    self, Header, RegisterRequest, Status, UploadRequest, WireMessage,
};

fn test_key() -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode([3u8; 32])
}

struct Harness {
    addr: std::net::SocketAddr,
    storage: Arc<MemoryStorage>,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 서버 + 소비자를 기동하고 접속 주소를 반환합니다.
async fn start_collector(sets: &[(&str, &[&str])], shared_key: &str) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let manager = Arc::new(IpSetManager::new());
    let loaded: HashMap<String, Vec<String>> = sets
        .iter()
        .map(|(name, entries)| {
            (
                (*name).to_owned(),
                entries.iter().map(|e| (*e).to_owned()).collect(),
            )
        })
        .collect();
    manager.reload(loaded);

    let config = CollectorConfig {
        shared_key: shared_key.to_owned(),
        queue_capacity: 16,
        ..CollectorConfig::default()
    };

    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let cancel = CancellationToken::new();

    let enricher = Enricher::new(Arc::new(StaticGeoIp::new()), manager, &EnrichConfig::default());
    let router = IndexRouter::new(Arc::clone(&storage) as Arc<dyn Storage>, 1_000_000);
    let consumer = Consumer::new(enricher, router, Arc::clone(&storage) as Arc<dyn Storage>);
    tokio::spawn(consumer.run(rx, cancel.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = CollectorServer::new(&config, tx).unwrap();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = server.run_on(listener, server_cancel).await;
    });

    Harness {
        addr,
        storage,
        cancel,
    }
}

/// 등록 핸드셰이크를 수행하고 (연결, 세션)을 반환합니다.
async fn register(addr: std::net::SocketAddr) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = WireMessage::RegisterRequest(RegisterRequest {
        header: Header::request(""),
    });
    wire::write_message(&mut stream, &request).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::RegisterResponse(resp) => {
            assert_eq!(resp.header.status, Status::Ack);
            assert!(!resp.header.session.is_empty());
            assert!(resp.timeout_seconds > 0);
            (stream, resp.header.session)
        }
        other => panic!("unexpected register reply: {other:?}"),
    }
}

fn upload(session: &str, asset: &str, file: &str, lines: &[&str]) -> WireMessage {
    WireMessage::UploadRequest(UploadRequest {
        header: Header::request(session),
        asset_id: asset.to_owned(),
        file_name: file.to_owned(),
        payload: lines.iter().map(|l| l.as_bytes().to_vec()).collect(),
    })
}

async fn wait_for_docs(storage: &MemoryStorage, index: &str, count: usize) -> Vec<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let docs = storage.documents(index).await;
        if docs.len() >= count {
            return docs;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {count} docs in {index}, got {}",
            docs.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn register_then_upload_reaches_storage_in_order() {
    let harness = start_collector(&[], "").await;
    let (mut stream, session) = register(harness.addr).await;

    // F1 (3라인)을 F2 (2라인)보다 먼저 업로드
    let f1 = upload(
        &session,
        "tap1",
        "conn.log",
        &[r#"{"seq":1}"#, r#"{"seq":2}"#, r#"{"seq":3}"#],
    );
    wire::write_message(&mut stream, &f1).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Ack),
        other => panic!("unexpected reply: {other:?}"),
    }

    let f2 = upload(&session, "tap1", "conn.log", &[r#"{"seq":4}"#, r#"{"seq":5}"#]);
    wire::write_message(&mut stream, &f2).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Ack),
        other => panic!("unexpected reply: {other:?}"),
    }

    // F1의 모든 라인이 F2의 어떤 라인보다 먼저 저장됨
    let docs = wait_for_docs(&harness.storage, "data-conn.log-tap1-1", 5).await;
    let seqs: Vec<u64> = docs
        .iter()
        .map(|d| {
            serde_json::from_slice::<serde_json::Value>(d).unwrap()["seq"]
                .as_u64()
                .unwrap()
        })
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_with_empty_session_is_fault_not_nack() {
    let harness = start_collector(&[], "").await;
    let (mut stream, _session) = register(harness.addr).await;

    let bad = upload("", "tap1", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &bad).await.unwrap();

    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::Fault { header } => {
            assert!(header.error_msg.contains("session"));
        }
        other => panic!("expected fault, got: {other:?}"),
    }
    // fault 이후 연결은 닫힘
    let err = wire::read_message(&mut stream).await.unwrap_err();
    assert!(matches!(
        err,
        watchpost_core::error::ProtocolError::ConnectionClosed
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_with_foreign_session_is_fault() {
    let harness = start_collector(&[], "").await;
    let (mut stream, _session) = register(harness.addr).await;

    let forged = upload("some-other-session", "tap1", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &forged).await.unwrap();

    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::Fault { .. } => {}
        other => panic!("expected fault, got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_before_register_is_fault() {
    let harness = start_collector(&[], "").await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let early = upload("made-up", "tap1", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &early).await.unwrap();

    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::Fault { .. } => {}
        other => panic!("expected fault, got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn content_violations_get_nack_and_connection_survives() {
    let harness = start_collector(&[], "").await;
    let (mut stream, session) = register(harness.addr).await;

    // 에셋 ID 없음 → NACK
    let no_asset = upload(&session, "", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &no_asset).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => {
            assert_eq!(resp.header.status, Status::Nack);
            assert!(resp.header.error_msg.contains("asset ID"));
        }
        other => panic!("expected nack, got: {other:?}"),
    }

    // 파일 이름 없음 → NACK
    let no_file = upload(&session, "tap1", "", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &no_file).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Nack),
        other => panic!("expected nack, got: {other:?}"),
    }

    // 페이로드 없음 → NACK
    let no_payload = upload(&session, "tap1", "conn.log", &[]);
    wire::write_message(&mut stream, &no_payload).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => {
            assert_eq!(resp.header.status, Status::Nack);
            assert!(resp.header.error_msg.contains("payload"));
        }
        other => panic!("expected nack, got: {other:?}"),
    }

    // NACK 이후에도 같은 연결로 정상 업로드 가능
    let ok = upload(&session, "tap1", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream, &ok).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Ack),
        other => panic!("expected ack, got: {other:?}"),
    }
    wait_for_docs(&harness.storage, "data-conn.log-tap1-1", 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_timestamp_header_is_fault() {
    let harness = start_collector(&[], "").await;
    let (mut stream, session) = register(harness.addr).await;

    let mut header = Header::request(&session);
    header.msg_timestamp = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    let bad = WireMessage::UploadRequest(UploadRequest {
        header,
        asset_id: "tap1".to_owned(),
        file_name: "conn.log".to_owned(),
        payload: vec![b"{}".to_vec()],
    });
    wire::write_message(&mut stream, &bad).await.unwrap();

    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::Fault { header } => assert!(header.error_msg.contains("timestamp")),
        other => panic!("expected fault, got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn alarm_derived_for_matching_source_ip() {
    let harness = start_collector(&[("badnet", &["10.0.1.0/24"])], "").await;
    let (mut stream, session) = register(harness.addr).await;

    let frame = upload(
        &session,
        "tap1",
        "conn.log",
        &[r#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"10.0.1.53","id_resp_h":"8.8.8.8"}"#],
    );
    wire::write_message(&mut stream, &frame).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Ack),
        other => panic!("expected ack, got: {other:?}"),
    }

    let alarms = wait_for_docs(&harness.storage, "data-conn.log.alarm-tap1-1", 1).await;
    let alarm: serde_json::Value = serde_json::from_slice(&alarms[0]).unwrap();
    assert_eq!(alarm["id_orig_h_pos"], serde_json::json!(["badnet"]));
    assert_eq!(alarm["id_resp_h_neg"], serde_json::json!(["badnet"]));

    let data = wait_for_docs(&harness.storage, "data-conn.log-tap1-1", 1).await;
    let doc: serde_json::Value = serde_json::from_slice(&data[0]).unwrap();
    // 데이터 문서에는 알람 배열이 없음
    assert!(doc.get("id_orig_h_pos").is_none());
    assert_eq!(doc["id_orig_h_asn"], "");
}

#[tokio::test(flavor = "multi_thread")]
async fn encrypted_frame_opened_before_enqueue() {
    let harness = start_collector(&[], &test_key()).await;
    let (mut stream, session) = register(harness.addr).await;

    let cipher = PayloadCipher::from_base64_key(&test_key()).unwrap();
    let sealed = cipher.seal(br#"{"seq":1}"#).unwrap();
    let frame = WireMessage::UploadRequest(UploadRequest {
        header: Header::request(&session).with_encrypted(true),
        asset_id: "tap1".to_owned(),
        file_name: "conn.log".to_owned(),
        payload: vec![sealed],
    });
    wire::write_message(&mut stream, &frame).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => assert_eq!(resp.header.status, Status::Ack),
        other => panic!("expected ack, got: {other:?}"),
    }

    // 저장된 문서는 평문 JSON
    let docs = wait_for_docs(&harness.storage, "data-conn.log-tap1-1", 1).await;
    assert_eq!(docs[0], br#"{"seq":1}"#.to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_encrypted_frame_is_nacked() {
    let harness = start_collector(&[], &test_key()).await;
    let (mut stream, session) = register(harness.addr).await;

    let frame = WireMessage::UploadRequest(UploadRequest {
        header: Header::request(&session).with_encrypted(true),
        asset_id: "tap1".to_owned(),
        file_name: "conn.log".to_owned(),
        payload: vec![b"garbage-not-sealed".to_vec()],
    });
    wire::write_message(&mut stream, &frame).await.unwrap();
    match wire::read_message(&mut stream).await.unwrap() {
        WireMessage::UploadResponse(resp) => {
            assert_eq!(resp.header.status, Status::Nack);
            assert!(resp.header.error_msg.contains("encrypted"));
        }
        other => panic!("expected nack, got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_are_per_connection() {
    let harness = start_collector(&[], "").await;
    let (_stream_a, session_a) = register(harness.addr).await;
    let (mut stream_b, session_b) = register(harness.addr).await;
    assert_ne!(session_a, session_b);

    // 연결 A의 세션은 연결 B에서 유효하지 않음
    let cross = upload(&session_a, "tap1", "conn.log", &[r#"{"a":1}"#]);
    wire::write_message(&mut stream_b, &cross).await.unwrap();
    match wire::read_message(&mut stream_b).await.unwrap() {
        WireMessage::Fault { .. } => {}
        other => panic!("expected fault, got: {other:?}"),
    }
}
