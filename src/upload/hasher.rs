//! Content hasher
//!
//! Streams a source chunk by chunk through SHA-256. Chunks are read one at a
//! time so memory stays bounded by the chunk size. The digest depends only on
//! the content, never on the chunk size used to read it.

use sha2::{Digest, Sha256};

use super::chunker;
use super::session::AbortSignal;
use super::source::ByteSource;
use super::types::{percent_of, UploadError};

/// Hash the whole of `source`, reporting integer percent after every chunk
///
/// The final progress report is always 100. A read failure discards the
/// partial digest. `signal` is checked before every read.
pub async fn hash_source<F>(
    source: &dyn ByteSource,
    chunk_size: u64,
    signal: &AbortSignal,
    mut on_progress: F,
) -> Result<String, UploadError>
where
    F: FnMut(u8) + Send,
{
    let chunks = chunker::split(source.len(), chunk_size)?;
    let mut hasher = Sha256::new();

    for chunk in &chunks {
        signal.check()?;
        let bytes = source.read_range(chunk.start, chunk.end).await?;
        hasher.update(&bytes);
        on_progress(percent_of(chunk.index + 1, chunks.len()));
    }

    if chunks.is_empty() {
        on_progress(100);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA-256 hash of in-memory data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::upload::source::MemorySource;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_hash_independent_of_chunk_size() {
        let data = sample(10_000);
        let source = MemorySource::new(data.clone());

        let expected = compute_hash(&data);
        for chunk_size in [1u64, 7, 1024, 4096, 10_000, 1 << 20] {
            let hash = hash_source(&source, chunk_size, &AbortSignal::new(), |_| {}).await.unwrap();
            assert_eq!(hash, expected, "chunk size {}", chunk_size);
        }
        assert_eq!(expected.len(), 64);
    }

    #[tokio::test]
    async fn test_progress_monotonic_and_final() {
        let source = MemorySource::new(sample(1000));
        let mut reports = Vec::new();

        hash_source(&source, 300, &AbortSignal::new(), |p| reports.push(p)).await.unwrap();

        assert_eq!(reports, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let source = MemorySource::new(Vec::new());
        let mut reports = Vec::new();

        let hash = hash_source(&source, 16, &AbortSignal::new(), |p| reports.push(p)).await.unwrap();

        assert_eq!(hash, compute_hash(b""));
        assert_eq!(reports, vec![100]);
    }

    struct FailingSource;

    #[async_trait]
    impl ByteSource for FailingSource {
        fn len(&self) -> u64 {
            100
        }

        async fn read_range(&self, start: u64, _end: u64) -> std::io::Result<Vec<u8>> {
            if start >= 50 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
            }
            Ok(vec![0; 10])
        }
    }

    #[tokio::test]
    async fn test_read_error_discards_hash() {
        let mut reports = Vec::new();
        let result = hash_source(&FailingSource, 10, &AbortSignal::new(), |p| reports.push(p)).await;

        assert!(matches!(result, Err(UploadError::Read(_))));
        assert_eq!(reports.len(), 5);
    }

    #[tokio::test]
    async fn test_abort_stops_reading() {
        let source = MemorySource::new(sample(1000));
        let signal = AbortSignal::new();
        let mut reports = Vec::new();

        let result = hash_source(&source, 100, &signal, |p| {
            reports.push(p);
            if p >= 30 {
                signal.abort();
            }
        })
        .await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(reports, vec![10, 20, 30]);
    }
}
