//! 로컬 진행 상태 저장소 -- 파일별 읽기 오프셋의 내구성 있는 기록
//!
//! 추적 중인 각 파일에 대해 (경로, 읽은 라인 수, 마지막 바이트 크기)를
//! 기록하고, 모든 변경을 즉시 단일 JSON 상태 파일에 커밋합니다.
//! 커밋 전에 크래시가 발생하면 다음 사이클이 직전 커밋에서 상태를
//! 복원하므로, 이미 전송된 청크가 최대 한 번 재전송될 수 있습니다.
//!
//! # 불변 조건
//! - `lines`는 커밋 사이에서 단조 비감소입니다.
//! - 더 이상 stat되지 않는 경로의 엔트리는 제거됩니다.
//! - 파일 크기가 기록보다 작아지면 (로테이션) 엔트리가 축출됩니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IngestError;

/// 단일 파일의 진행 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 읽고 업로드까지 완료한 라인 수
    pub lines: u64,
    /// 마지막 읽기 시점까지 소비한 바이트 수
    pub size: u64,
}

impl FileProgress {
    /// 오프셋 0의 새 진행 상태를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: 0,
            size: 0,
        }
    }
}

/// 상태 파일에 직렬화되는 전체 진행 데이터
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressDb {
    /// 추적 중인 파일 목록
    pub files: Vec<FileProgress>,
    /// 다음에 스캔할 파일 인덱스 (라운드 로빈 커서)
    pub next: usize,
    /// 할당된 에셋 식별자
    pub asset_id: String,
    /// 공유 암호화 키 (base64)
    pub shared_key: String,
}

/// 진행 상태 저장소
///
/// 인메모리 [`ProgressDb`]와 그 영속 파일 경로를 함께 관리합니다.
/// 호출자는 하나의 뮤텍스로 저장소 전체를 보호해야 합니다.
pub struct ProgressStore {
    state_path: PathBuf,
    db: ProgressDb,
}

impl ProgressStore {
    /// 상태 파일을 로드합니다. 파일이 없거나 손상된 경우 빈 상태로 시작합니다.
    pub async fn load(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let db = match tokio::fs::read(&state_path).await {
            Ok(raw) => match serde_json::from_slice::<ProgressDb>(&raw) {
                Ok(db) => {
                    debug!(path = %state_path.display(), files = db.files.len(), "loaded local state");
                    db
                }
                Err(e) => {
                    warn!(path = %state_path.display(), error = %e, "corrupt local state, starting fresh");
                    ProgressDb::default()
                }
            },
            Err(_) => {
                debug!(path = %state_path.display(), "local state does not exist, creating new state");
                ProgressDb::default()
            }
        };
        Self { state_path, db }
    }

    /// 현재 상태에 대한 불변 참조를 반환합니다.
    pub fn db(&self) -> &ProgressDb {
        &self.db
    }

    /// 현재 상태에 대한 가변 참조를 반환합니다.
    pub fn db_mut(&mut self) -> &mut ProgressDb {
        &mut self.db
    }

    /// 상태를 영속 파일에 커밋합니다.
    pub async fn commit(&self) -> Result<(), IngestError> {
        let raw = serde_json::to_vec_pretty(&self.db).map_err(|e| IngestError::StateSave {
            reason: e.to_string(),
        })?;
        tokio::fs::write(&self.state_path, raw)
            .await
            .map_err(|e| IngestError::StateSave {
                reason: format!("{}: {}", self.state_path.display(), e),
            })
    }

    /// 경로가 이미 추적 중인지 확인합니다.
    pub fn contains(&self, path: &Path) -> bool {
        self.db.files.iter().any(|f| f.path == path)
    }

    /// 새 파일을 오프셋 0으로 추적 목록에 추가합니다.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.contains(&path) {
            debug!(path = %path.display(), "tracking new file");
            self.db.files.push(FileProgress::new(path));
        }
    }

    /// 인덱스 위치의 엔트리를 제거하고 커서를 보정합니다.
    pub fn remove_at(&mut self, index: usize) {
        if index < self.db.files.len() {
            self.db.files.remove(index);
            if self.db.next > index {
                self.db.next -= 1;
            }
            if self.db.next >= self.db.files.len() {
                self.db.next = 0;
            }
        }
    }

    /// stat되지 않는 모든 엔트리를 제거합니다.
    pub async fn clean(&mut self) {
        let mut broken = Vec::new();
        for (i, file) in self.db.files.iter().enumerate() {
            if tokio::fs::metadata(&file.path).await.is_err() {
                broken.push(i);
            }
        }
        // 인덱스가 밀리지 않도록 뒤에서부터 제거
        for i in broken.into_iter().rev() {
            debug!(path = %self.db.files[i].path.display(), "file no longer readable, untracking");
            self.remove_at(i);
        }
    }

    /// 프레임이 전송 계층에 수락된 뒤 라인/바이트 카운터를 반영합니다.
    ///
    /// `lines`는 단조 비감소이므로 기존 값보다 작은 갱신은 무시합니다.
    pub fn apply(&mut self, path: &Path, lines: u64, size: u64) {
        if let Some(file) = self.db.files.iter_mut().find(|f| f.path == path)
            && lines >= file.lines
        {
            file.lines = lines;
            file.size = size;
        }
    }
}
