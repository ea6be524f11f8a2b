//! 프레임 생성 -- 읽지 않은 라인을 업로드 프레임으로 변환
//!
//! 프레임은 단일 파일에서 읽은 순서 있는 JSON 바이트 라인 목록입니다.
//! 생성 시 라인 0부터 재스캔하여 이미 읽은 라인을 건너뜁니다
//! (사이클당 O(전체 라인) — 문서화된 비효율이며 정확성 문제는 아님).
//!
//! 라인/바이트 카운터는 [`PendingProgress`]로 반환되며, 호출자는
//! 전송 계층이 프레임을 수락한 뒤에만 카운터를 커밋합니다.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::error::IngestError;
use crate::progress::FileProgress;
use crate::zeek::{self, HEADER_LINES, ZeekHeader};

/// 전송 수락 후 커밋할 진행 카운터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingProgress {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 새 읽은 라인 수 (파일 시작 기준 누적)
    pub lines: u64,
    /// 새 소비 바이트 수 (파일 시작 기준 누적)
    pub size: u64,
}

/// 생성된 프레임 내용과 보류 중인 진행 카운터
#[derive(Debug, Clone)]
pub struct GeneratedFrame {
    /// 페이로드가 속한 파일 이름 (basename)
    pub file_name: String,
    /// 순서 있는 JSON 바이트 라인 목록
    pub payload: Vec<Vec<u8>>,
    /// 수락 후 커밋할 카운터
    pub pending: PendingProgress,
}

/// 파일의 읽지 않은 라인에서 프레임을 생성합니다.
///
/// 최대 `chunk_size`개의 비주석 라인을 읽어 파싱합니다. 파싱에 실패한
/// 라인은 로그를 남기고 버려지며 재시도하지 않습니다. 주석/빈 라인도
/// 라인 카운터에는 포함됩니다.
pub async fn generate_frame(
    progress: &FileProgress,
    chunk_size: usize,
) -> Result<GeneratedFrame, IngestError> {
    let header = read_header(&progress.path).await?;

    let file = open(&progress.path).await?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    // 이미 읽은 라인 건너뛰기 (바이트 카운터는 파일 시작부터 누적)
    let mut lines_read = 0u64;
    let mut bytes_read = 0u64;
    while lines_read < progress.lines {
        buf.clear();
        let n = read_one_line(&mut reader, &mut buf, &progress.path).await?;
        if n == 0 {
            break;
        }
        bytes_read += n as u64;
        lines_read += 1;
    }

    let mut payload = Vec::new();
    for _ in 0..chunk_size {
        buf.clear();
        let n = read_one_line(&mut reader, &mut buf, &progress.path).await?;
        if n == 0 {
            break;
        }
        bytes_read += n as u64;
        lines_read += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match zeek::parse_line(line, header.as_ref()) {
            Ok(parsed) => payload.push(parsed),
            Err(e) => {
                warn!(path = %progress.path.display(), error = %e, "dropping unparseable line");
                metrics::counter!("watchpost_agent_dropped_lines_total").increment(1);
            }
        }
    }

    let file_name = progress
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(GeneratedFrame {
        file_name,
        payload,
        pending: PendingProgress {
            path: progress.path.clone(),
            lines: lines_read,
            size: bytes_read,
        },
    })
}

/// 파일 첫 블록에서 TSV 헤더를 읽습니다. 헤더가 없으면 JSON 모드입니다.
async fn read_header(path: &Path) -> Result<Option<ZeekHeader>, IngestError> {
    let file = open(path).await?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(HEADER_LINES);
    let mut buf = Vec::new();
    for _ in 0..HEADER_LINES {
        buf.clear();
        let n = read_one_line(&mut reader, &mut buf, path).await?;
        if n == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_owned());
    }
    Ok(ZeekHeader::parse(&lines))
}

async fn open(path: &Path) -> Result<File, IngestError> {
    File::open(path).await.map_err(|e| IngestError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

async fn read_one_line(
    reader: &mut BufReader<File>,
    buf: &mut Vec<u8>,
    path: &Path,
) -> Result<usize, IngestError> {
    reader
        .read_until(b'\n', buf)
        .await
        .map_err(|e| IngestError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
