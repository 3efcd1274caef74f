//! File-backed upload state
//!
//! The whole snapshot is rewritten on every change: serialized to a sibling
//! temp file, then renamed over the old one so a crash never leaves a torn
//! state file behind. Memory only changes once the write has succeeded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CompletedFile, StoreError, StoreSnapshot, UploadStateStore};

#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    snapshot: Mutex<StoreSnapshot>,
}

impl FileStateStore {
    /// Load state from `path`, starting empty if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let snapshot = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            completed = snapshot.completed.len(),
            in_progress = snapshot.in_progress.len(),
            "Loaded upload state"
        );

        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadStateStore for FileStateStore {
    async fn completed_file(&self, file_hash: &str) -> Result<Option<CompletedFile>, StoreError> {
        Ok(self.snapshot.lock().await.completed.get(file_hash).cloned())
    }

    async fn uploaded_chunks(&self, file_hash: &str) -> Result<BTreeSet<usize>, StoreError> {
        Ok(self.snapshot.lock().await.uploaded_chunks(file_hash))
    }

    async fn record_chunk(&self, file_hash: &str, chunk_index: usize) -> Result<usize, StoreError> {
        let mut snapshot = self.snapshot.lock().await;
        let before = snapshot.uploaded_chunks(file_hash).len();

        let mut next = snapshot.clone();
        let count = next.record_chunk(file_hash, chunk_index);
        if count != before {
            self.persist(&next).await?;
            *snapshot = next;
        }
        Ok(count)
    }

    async fn complete_file(&self, file_hash: &str, file: CompletedFile) -> Result<(), StoreError> {
        let mut snapshot = self.snapshot.lock().await;

        let mut next = snapshot.clone();
        next.complete(file_hash, file);
        self.persist(&next).await?;
        *snapshot = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("uploads.json");

        {
            let store = FileStateStore::open(&path).await.unwrap();
            store.record_chunk("partial", 1).await.unwrap();
            store.record_chunk("partial", 3).await.unwrap();
            store.record_chunk("done", 0).await.unwrap();
            store
                .complete_file(
                    "done",
                    CompletedFile {
                        file_name: "movie.mkv".to_string(),
                        url: "http://x/files/done/movie.mkv".to_string(),
                        uploaded_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let store = FileStateStore::open(&path).await.unwrap();
        assert_eq!(
            store.uploaded_chunks("partial").await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(store.uploaded_chunks("done").await.unwrap().is_empty());
        assert_eq!(
            store.completed_file("done").await.unwrap().unwrap().file_name,
            "movie.mkv"
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(dir.path().join("none.json")).await.unwrap();
        assert!(store.completed_file("x").await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("sub");
        let path = blocker.join("uploads.json");
        let store = FileStateStore::open(&path).await.unwrap();

        // A regular file where the state directory should go
        std::fs::write(&blocker, b"").unwrap();

        assert!(matches!(store.record_chunk("h", 1).await, Err(StoreError::Io(_))));
        assert!(store.uploaded_chunks("h").await.unwrap().is_empty());

        let file = CompletedFile {
            file_name: "a.bin".to_string(),
            url: "http://x/files/h/a.bin".to_string(),
            uploaded_at: Utc::now(),
        };
        assert!(store.complete_file("h", file.clone()).await.is_err());
        assert!(store.completed_file("h").await.unwrap().is_none());

        // The retry persists once the path is writable again
        std::fs::remove_file(&blocker).unwrap();
        assert_eq!(store.record_chunk("h", 1).await.unwrap(), 1);

        let reopened = FileStateStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.uploaded_chunks("h").await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = FileStateStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
