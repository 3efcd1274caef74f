//! Byte sources
//!
//! Random-access readers the chunker, hasher and uploader pull chunk bytes
//! from. Reads are always bounded to one chunk.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access source of file bytes
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read bytes `[start, end)`
    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>>;
}

fn check_range(start: u64, end: u64, len: u64) -> std::io::Result<()> {
    if start > end || end > len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("range {}..{} outside source of {} bytes", start, end, len),
        ));
    }
    Ok(())
}

// ============================================================================
// In-Memory Source
// ============================================================================

/// Source backed by an in-memory buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        check_range(start, end, self.len())?;
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}

// ============================================================================
// File Source
// ============================================================================

/// Source backed by a file on disk
///
/// The size is captured when opened; each read opens its own handle so
/// concurrent chunk reads do not share a cursor.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component, used as the upload's file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string())
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        check_range(start, end, self.len)?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }
}
