//! 스토리지 인터페이스 -- 외부 저장 엔진에 대한 좁은 추상화
//!
//! 실제 검색 엔진 클라이언트는 이 저장소의 범위 밖이며, 컬렉터는
//! [`Storage`] trait이 정의한 네 가지 연산만 사용합니다. 테스트와
//! 로컬 실행에는 [`MemoryStorage`]를 사용합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use watchpost_core::error::StorageError;

/// 저장 엔진에 대한 좁은 인터페이스
#[async_trait]
pub trait Storage: Send + Sync {
    /// 지정된 이름의 인덱스를 생성합니다.
    async fn create_index(&self, index: &str) -> Result<(), StorageError>;

    /// JSON 문서를 인덱스에 색인하고 문서 ID를 반환합니다.
    ///
    /// 인덱스가 없으면 암묵적으로 생성됩니다.
    async fn index_document(&self, index: &str, document: &[u8]) -> Result<String, StorageError>;

    /// 접두사와 일치하는 인덱스 이름 목록을 반환합니다.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// 인덱스의 실제 문서 수를 반환합니다.
    async fn doc_count(&self, index: &str) -> Result<u64, StorageError>;
}

/// 인메모리 스토리지 구현
///
/// 인덱스 이름 → 문서 목록 매핑을 유지합니다. 문서 순서는
/// 색인 순서와 같습니다 (FIFO 검증에 사용).
#[derive(Default)]
pub struct MemoryStorage {
    indices: RwLock<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemoryStorage {
    /// 빈 스토리지를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 인덱스의 문서 목록을 색인 순서대로 반환합니다 (테스트 보조).
    pub async fn documents(&self, index: &str) -> Vec<Vec<u8>> {
        self.indices
            .read()
            .await
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// 모든 인덱스 이름을 반환합니다 (테스트 보조).
    pub async fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_index(&self, index: &str) -> Result<(), StorageError> {
        self.indices
            .write()
            .await
            .entry(index.to_owned())
            .or_default();
        Ok(())
    }

    async fn index_document(&self, index: &str, document: &[u8]) -> Result<String, StorageError> {
        let mut indices = self.indices.write().await;
        indices
            .entry(index.to_owned())
            .or_default()
            .push(document.to_vec());
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let indices = self.indices.read().await;
        let mut names: Vec<String> = indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn doc_count(&self, index: &str) -> Result<u64, StorageError> {
        let indices = self.indices.read().await;
        Ok(indices.get(index).map(|docs| docs.len() as u64).unwrap_or(0))
    }
}
