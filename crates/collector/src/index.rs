//! 인덱스 라우터 -- 크기 제한 샤드 선택과 정수 접미사 회전
//!
//! (파일, 에셋) 쌍마다 (알람 인덱스는 독립적으로) {인덱스 이름 →
//! 근사 문서 수} 캐시를 유지합니다. 캐시된 인덱스가 `max_index_size`
//! 미만이면 사용하고, 도달하면 다음 정수 접미사 인덱스를 할당합니다.
//! 캐시에 없으면 스토리지에서 기존 인덱스를 조회해 가장 높은 접미사를
//! 채택하거나 (실제 문서 수로 캐시를 시딩) 접미사+1을 할당합니다.
//!
//! 보장은 근사치입니다: 여러 writer 프로세스가 동시에 쓰는 경우
//! 카운터가 정확하지 않을 수 있습니다. 접미사는 앞으로만 증가합니다.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::CollectorError;
use crate::storage::Storage;

/// 인덱스 이름 접두사
const INDEX_PREFIX: &str = "data";

/// 크기 제한 인덱스 라우터
///
/// 전역 가변 상태 대신 라우터 객체가 캐시를 소유하며, 한 번 생성되어
/// 소비자에 전달됩니다.
pub struct IndexRouter {
    storage: Arc<dyn Storage>,
    max_index_size: u64,
    // 인덱스 이름 → 근사 문서 수
    counts: HashMap<String, u64>,
}

impl IndexRouter {
    /// 새 라우터를 생성합니다.
    pub fn new(storage: Arc<dyn Storage>, max_index_size: u64) -> Self {
        Self {
            storage,
            max_index_size,
            counts: HashMap::new(),
        }
    }

    /// (파일, 에셋) 쌍의 쓰기 대상 인덱스를 선택합니다.
    ///
    /// `alarm`이 true이면 알람 자매 인덱스 계열에서 선택합니다.
    pub async fn select(
        &mut self,
        file_name: &str,
        asset_id: &str,
        alarm: bool,
    ) -> Result<String, CollectorError> {
        let key_prefix = index_key_prefix(file_name, asset_id, alarm);

        // 캐시 탐색
        if let Some((cached, count)) = self
            .counts
            .iter()
            .find(|(name, _)| name.starts_with(&key_prefix))
            .map(|(name, count)| (name.clone(), *count))
        {
            if count < self.max_index_size {
                return Ok(cached);
            }
            // 한도 도달: 다음 접미사로 회전
            self.counts.remove(&cached);
            let next_suffix = index_suffix(&cached).unwrap_or(0) + 1;
            let next = format!("{key_prefix}{next_suffix}");
            debug!(from = %cached, to = %next, "rotating index forward");
            self.counts.insert(next.clone(), 0);
            return Ok(next);
        }

        // 캐시에 없음: 스토리지에서 기존 인덱스 조회
        let existing = self.storage.list_indices(&key_prefix).await?;
        let highest = existing.iter().filter_map(|name| index_suffix(name)).max();

        match highest {
            Some(highest) => {
                let candidate = format!("{key_prefix}{highest}");
                let stored = self.storage.doc_count(&candidate).await?;
                if stored < self.max_index_size {
                    // 실제 문서 수로 캐시 시딩 후 채택
                    self.counts.insert(candidate.clone(), stored);
                    Ok(candidate)
                } else {
                    let next = format!("{key_prefix}{}", highest + 1);
                    self.counts.insert(next.clone(), 0);
                    Ok(next)
                }
            }
            None => {
                // 어디에도 없음: 접미사 1에서 시작
                let first = format!("{key_prefix}1");
                self.counts.insert(first.clone(), 0);
                Ok(first)
            }
        }
    }

    /// 문서 쓰기 성공 후 인덱스의 근사 문서 수를 증가시킵니다.
    pub fn committed(&mut self, index: &str) {
        if let Some(count) = self.counts.get_mut(index) {
            *count += 1;
        }
    }

    /// 캐시된 인덱스의 근사 문서 수를 반환합니다 (테스트 보조).
    pub fn cached_count(&self, index: &str) -> Option<u64> {
        self.counts.get(index).copied()
    }
}

/// (파일, 에셋, 알람 여부)에 대한 인덱스 이름 접두사를 생성합니다.
///
/// 파일 이름의 `-`는 `_`로 정규화됩니다. 접미사 숫자가 뒤에 붙습니다.
fn index_key_prefix(file_name: &str, asset_id: &str, alarm: bool) -> String {
    let normalized = file_name.replace('-', "_");
    if alarm {
        format!("{INDEX_PREFIX}-{normalized}.alarm-{asset_id}-")
    } else {
        format!("{INDEX_PREFIX}-{normalized}-{asset_id}-")
    }
}

/// 인덱스 이름에서 정수 접미사를 추출합니다.
fn index_suffix(index: &str) -> Option<u64> {
    index.rsplit('-').next()?.parse().ok()
}
