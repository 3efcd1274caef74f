//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::ratelimit::UploadRateLimiter;
use crate::storage::{FileStateStore, MemoryStateStore, StoreError, UploadStateStore};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to open upload state: {0}")]
    Store(#[from] StoreError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    limiter: Arc<UploadRateLimiter>,
    store: Arc<dyn UploadStateStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn UploadStateStore>) -> Self {
        let limiter = Arc::new(UploadRateLimiter::new(&config.rate_limit));
        Self {
            inner: Arc::new(AppStateInner {
                config,
                limiter,
                store,
            }),
        }
    }

    /// Build state with the store selected by configuration
    pub async fn from_config(config: Config) -> Result<Self, StateError> {
        let store: Arc<dyn UploadStateStore> = match &config.storage.state_file {
            Some(path) => Arc::new(FileStateStore::open(path.clone()).await?),
            None => {
                tracing::info!("No STATE_FILE set, upload state is kept in memory");
                Arc::new(MemoryStateStore::new())
            }
        };
        Ok(Self::new(config, store))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn limiter(&self) -> &UploadRateLimiter {
        &self.inner.limiter
    }

    pub fn store(&self) -> &dyn UploadStateStore {
        self.inner.store.as_ref()
    }

    /// Public location of an assembled file
    pub fn file_url(&self, file_hash: &str, file_name: &str) -> String {
        format!(
            "{}/files/{}/{}",
            self.inner.config.server.public_base_url.trim_end_matches('/'),
            file_hash,
            urlencoding::encode(file_name)
        )
    }

    /// Start the limiter eviction sweep
    pub fn start_background_tasks(&self) -> tokio::task::JoinHandle<()> {
        let rate_limit = &self.inner.config.rate_limit;
        self.inner
            .limiter
            .clone()
            .start_cleanup_task(rate_limit.cleanup_interval(), rate_limit.max_idle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_encodes_name() {
        let mut config = Config::default();
        config.server.public_base_url = "https://cdn.example.com/".to_string();
        let state = AppState::new(config, Arc::new(MemoryStateStore::new()));

        assert_eq!(
            state.file_url("abc123", "my report.pdf"),
            "https://cdn.example.com/files/abc123/my%20report.pdf"
        );
    }

    #[tokio::test]
    async fn test_from_config_uses_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.state_file = Some(dir.path().join("state.json"));

        let state = AppState::from_config(config).await.unwrap();
        state.store().record_chunk("h", 0).await.unwrap();

        assert!(dir.path().join("state.json").exists());
    }
}
