//! 파일 스캐너 -- 추적 대상 발견, 로테이션 감지, 프레임 후보 선택
//!
//! 파일 모드에서는 단일 경로를, 디렉토리 모드에서는 화이트리스트에 있는
//! 이름의 일반 파일을 재귀적으로 추적합니다. 프레임 후보는 라운드 로빈
//! 커서로 선택하며, 생성할 프레임이 없으면 대기 후 재시도합니다
//! (busy wait 없음).
//!
//! # 로테이션 휴리스틱
//! 현재 크기 < 기록된 크기이면 엔트리를 축출합니다. 다음 sync가 오프셋
//! 0으로 다시 추가하므로 읽지 않은 꼬리는 유실됩니다 (알려진 트레이드오프).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::frame::{GeneratedFrame, PendingProgress, generate_frame};
use crate::progress::ProgressStore;

/// 디렉토리 모드에서 추적하는 Zeek 로그 파일 이름
pub const TRACKED_LOG_FILES: &[&str] = &[
    "conn.log",
    "dhcp.log",
    "dns.log",
    "ftp.log",
    "http.log",
    "irc.log",
    "modbus.log",
    "mysql.log",
    "notice.log",
    "radius.log",
    "rdp.log",
    "sip.log",
    "smtp.log",
    "snmp.log",
    "socks.log",
    "ssh.log",
    "ssl.log",
    "stats.log",
    "syslog.log",
    "tunnel.log",
    "weird.log",
];

/// 경로 모드 — 단일 파일 또는 디렉토리
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// 단일 일반 파일 추적
    File,
    /// 디렉토리 재귀 추적 (화이트리스트 적용)
    Directory,
}

/// 파일 스캐너
pub struct Scanner {
    root: PathBuf,
    mode: PathMode,
    chunk_size: usize,
    idle_sleep: Duration,
    store: Arc<Mutex<ProgressStore>>,
}

impl Scanner {
    /// 루트 경로를 확인하고 스캐너를 생성합니다.
    pub async fn new(
        root: impl Into<PathBuf>,
        chunk_size: usize,
        idle_sleep: Duration,
        store: Arc<Mutex<ProgressStore>>,
    ) -> Result<Self, IngestError> {
        let root = root.into();
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|_| IngestError::PathNotFound {
                path: root.display().to_string(),
            })?;
        let mode = if meta.is_dir() {
            PathMode::Directory
        } else if meta.is_file() {
            PathMode::File
        } else {
            return Err(IngestError::PathNotFound {
                path: root.display().to_string(),
            });
        };
        Ok(Self {
            root,
            mode,
            chunk_size,
            idle_sleep,
            store,
        })
    }

    /// 경로 모드를 반환합니다.
    pub fn mode(&self) -> PathMode {
        self.mode
    }

    /// 진행 상태 저장소를 반환합니다.
    pub fn store(&self) -> Arc<Mutex<ProgressStore>> {
        Arc::clone(&self.store)
    }

    /// 로컬 상태를 파일 시스템과 동기화합니다.
    ///
    /// 새 파일은 오프셋 0으로 추가되고, 더 이상 stat되지 않는 엔트리는
    /// 제거됩니다. 변경 사항은 즉시 커밋됩니다.
    pub async fn sync(&self) -> Result<(), IngestError> {
        let mut store = self.store.lock().await;
        store.clean().await;

        match self.mode {
            PathMode::File => {
                let abs = tokio::fs::canonicalize(&self.root)
                    .await
                    .map_err(|_| IngestError::PathNotFound {
                        path: self.root.display().to_string(),
                    })?;
                store.track(abs);
            }
            PathMode::Directory => {
                let found = discover_log_files(&self.root).await?;
                for path in found {
                    store.track(path);
                }
                if store.db().files.is_empty() {
                    warn!(path = %self.root.display(), "no files found in directory, nothing to send");
                }
            }
        }

        store.commit().await
    }

    /// 전송 준비가 된 다음 프레임을 반환합니다.
    ///
    /// 생성할 프레임이 없으면 대기 후 재시도하며, 취소 시 `None`을
    /// 반환합니다. 반환된 프레임의 카운터는 전송 수락 후
    /// [`Scanner::commit_progress`]로 커밋해야 합니다.
    pub async fn next_frame(&self, cancel: &CancellationToken) -> Option<GeneratedFrame> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let mut store = self.store.lock().await;

            if store.db().files.is_empty() {
                drop(store);
                // 추적 목록이 비면 재동기화로 상태를 복원
                if let Err(e) = self.sync().await {
                    warn!(error = %e, "state sync failed");
                }
                if self.store.lock().await.db().files.is_empty() {
                    debug!("no files to upload, sleeping");
                    if !self.idle_wait(cancel).await {
                        return None;
                    }
                }
                continue;
            }

            // 깨진 엔트리 정리 + 변경 감지 (역순으로 순회하여 제거 안전)
            let mut removed = false;
            let mut modified = false;
            for i in (0..store.db().files.len()).rev() {
                let entry = store.db().files[i].clone();
                match tokio::fs::metadata(&entry.path).await {
                    Err(_) => {
                        debug!(path = %entry.path.display(), "can no longer read file, untracking");
                        store.remove_at(i);
                        removed = true;
                    }
                    Ok(meta) if meta.len() < entry.size => {
                        debug!(path = %entry.path.display(), "file shrank, assuming rotation, untracking");
                        store.remove_at(i);
                        removed = true;
                    }
                    Ok(meta) if meta.len() != entry.size => {
                        modified = true;
                    }
                    Ok(_) => {}
                }
            }
            if removed {
                commit_or_warn(&store).await;
                continue;
            }
            if !modified {
                drop(store);
                debug!("no changes to upload, sleeping");
                if !self.idle_wait(cancel).await {
                    return None;
                }
                continue;
            }

            // 라운드 로빈으로 다음 후보 선택
            let len = store.db().files.len();
            let idx = if store.db().next >= len {
                0
            } else {
                store.db().next
            };
            let entry = store.db().files[idx].clone();
            store.db_mut().next = (idx + 1) % len;

            let meta = match tokio::fs::metadata(&entry.path).await {
                Ok(meta) => meta,
                Err(_) => {
                    store.remove_at(idx);
                    commit_or_warn(&store).await;
                    continue;
                }
            };
            if meta.len() == entry.size {
                // 이 파일에는 새 데이터 없음, 다음 파일로
                commit_or_warn(&store).await;
                continue;
            }

            match generate_frame(&entry, self.chunk_size).await {
                Ok(frame) => {
                    commit_or_warn(&store).await;
                    if frame.payload.is_empty() {
                        // 주석/헤더만 소비한 경우: 전송할 것이 없으므로 즉시 반영
                        store.apply(&frame.pending.path, frame.pending.lines, frame.pending.size);
                        commit_or_warn(&store).await;
                        continue;
                    }
                    return Some(frame);
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "failed to generate frame");
                    commit_or_warn(&store).await;
                    continue;
                }
            }
        }
    }

    /// 전송 계층이 프레임을 수락한 뒤 진행 카운터를 커밋합니다.
    pub async fn commit_progress(&self, pending: &PendingProgress) -> Result<(), IngestError> {
        let mut store = self.store.lock().await;
        store.apply(&pending.path, pending.lines, pending.size);
        store.commit().await
    }

    /// 취소 가능한 대기. 취소되면 `false`를 반환합니다.
    async fn idle_wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.idle_sleep) => true,
        }
    }
}

async fn commit_or_warn(store: &ProgressStore) {
    if let Err(e) = store.commit().await {
        warn!(error = %e, "failed to commit local state");
    }
}

/// 디렉토리를 재귀적으로 순회하며 화이트리스트에 있는 일반 파일을 수집합니다.
async fn discover_log_files(root: &std::path::Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| IngestError::FileRead {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::FileRead {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?
        {
            let path = entry.path();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(path);
            } else if meta.is_file()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && TRACKED_LOG_FILES.contains(&name)
            {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}
