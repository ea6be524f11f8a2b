//! 수신 파이프라인 -- 단일 소비자의 FIFO 드레인과 색인
//!
//! 정확히 하나의 소비자 태스크가 프레임 큐를 FIFO 순서로 비우고,
//! 각 라인을 순서대로 보강 + 인덱스 라우팅 + 색인에 전달합니다.
//! 한 라인의 색인 실패는 로그만 남기고 나머지 라인과 소비자 루프를
//! 중단하지 않습니다 (fire-and-forget, 실패 쓰기 재시도 없음).
//!
//! 소비자는 단일 스레드이므로 직렬 보강+쓰기 비용이 처리량의 상한입니다
//! (단순성 우선 트레이드오프).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::enrich::Enricher;
use crate::index::IndexRouter;
use crate::storage::Storage;

/// 큐에 적재되는 프레임 (복호화 완료 상태)
#[derive(Debug, Clone)]
pub struct Frame {
    /// 에셋 식별자
    pub asset_id: String,
    /// 업로드 파일 이름
    pub file_name: String,
    /// JSON 바이트 라인 목록
    pub payload: Vec<Vec<u8>>,
}

/// 큐 소비자
pub struct Consumer {
    enricher: Enricher,
    router: IndexRouter,
    storage: Arc<dyn Storage>,
}

impl Consumer {
    /// 새 소비자를 생성합니다.
    pub fn new(enricher: Enricher, router: IndexRouter, storage: Arc<dyn Storage>) -> Self {
        Self {
            enricher,
            router,
            storage,
        }
    }

    /// 취소되거나 큐가 닫힐 때까지 프레임을 FIFO로 소비합니다.
    pub async fn run(mut self, mut queue: mpsc::Receiver<Frame>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("consumer cancelled");
                    return;
                }
                frame = queue.recv() => {
                    match frame {
                        Some(frame) => self.ingest(frame).await,
                        None => {
                            debug!("frame queue closed, consumer exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// 프레임의 모든 라인을 순서대로 색인합니다.
    pub async fn ingest(&mut self, frame: Frame) {
        for line in &frame.payload {
            let enrichment = self.enricher.enrich(line);

            // 알람이 파생된 경우 알람 자매 인덱스에 먼저 기록
            if let Some(alarm) = &enrichment.alarm {
                match self
                    .router
                    .select(&frame.file_name, &frame.asset_id, true)
                    .await
                {
                    Ok(index) => match self.storage.index_document(&index, alarm).await {
                        Ok(_) => {
                            self.router.committed(&index);
                            metrics::counter!("watchpost_alarms_indexed_total").increment(1);
                        }
                        Err(e) => error!(
                            file_name = %frame.file_name,
                            asset_id = %frame.asset_id,
                            index = %index,
                            error = %e,
                            "failed to index alarm"
                        ),
                    },
                    Err(e) => error!(
                        file_name = %frame.file_name,
                        asset_id = %frame.asset_id,
                        error = %e,
                        "failed to select alarm index"
                    ),
                }
            }

            match self
                .router
                .select(&frame.file_name, &frame.asset_id, false)
                .await
            {
                Ok(index) => match self.storage.index_document(&index, &enrichment.data).await {
                    Ok(_) => {
                        self.router.committed(&index);
                        metrics::counter!("watchpost_lines_indexed_total").increment(1);
                    }
                    Err(e) => error!(
                        file_name = %frame.file_name,
                        asset_id = %frame.asset_id,
                        index = %index,
                        error = %e,
                        "failed to index payload"
                    ),
                },
                Err(e) => error!(
                    file_name = %frame.file_name,
                    asset_id = %frame.asset_id,
                    error = %e,
                    "failed to select index"
                ),
            }
        }
    }
}
