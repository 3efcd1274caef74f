//! In-memory upload state

use std::collections::BTreeSet;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CompletedFile, StoreError, StoreSnapshot, UploadStateStore};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: RwLock<StoreSnapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UploadStateStore for MemoryStateStore {
    async fn completed_file(&self, file_hash: &str) -> Result<Option<CompletedFile>, StoreError> {
        Ok(self.snapshot.read().completed.get(file_hash).cloned())
    }

    async fn uploaded_chunks(&self, file_hash: &str) -> Result<BTreeSet<usize>, StoreError> {
        Ok(self.snapshot.read().uploaded_chunks(file_hash))
    }

    async fn record_chunk(&self, file_hash: &str, chunk_index: usize) -> Result<usize, StoreError> {
        Ok(self.snapshot.write().record_chunk(file_hash, chunk_index))
    }

    async fn complete_file(&self, file_hash: &str, file: CompletedFile) -> Result<(), StoreError> {
        self.snapshot.write().complete(file_hash, file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_chunks_recorded_until_complete() {
        let store = MemoryStateStore::new();

        assert_eq!(store.record_chunk("h1", 2).await.unwrap(), 1);
        assert_eq!(store.record_chunk("h1", 0).await.unwrap(), 2);
        assert_eq!(store.record_chunk("h1", 2).await.unwrap(), 2);
        assert_eq!(
            store.uploaded_chunks("h1").await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert!(store.completed_file("h1").await.unwrap().is_none());

        let file = CompletedFile {
            file_name: "a.bin".to_string(),
            url: "http://x/files/h1/a.bin".to_string(),
            uploaded_at: Utc::now(),
        };
        store.complete_file("h1", file.clone()).await.unwrap();

        assert_eq!(store.completed_file("h1").await.unwrap(), Some(file));
        assert!(store.uploaded_chunks("h1").await.unwrap().is_empty());
    }
}
