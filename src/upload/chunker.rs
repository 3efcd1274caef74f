//! Chunker
//!
//! Splits a file of known size into fixed-size byte ranges. Chunk `i` always
//! covers `[i * chunk_size, min((i + 1) * chunk_size, file_size))`.

use super::types::{Chunk, UploadError};

/// Number of chunks a file of `file_size` bytes splits into
pub fn chunk_count(file_size: u64, chunk_size: u64) -> Result<usize, UploadError> {
    if chunk_size == 0 {
        return Err(UploadError::InvalidChunkSize);
    }
    Ok(file_size.div_ceil(chunk_size) as usize)
}

/// Split `file_size` bytes into ordered chunks of `chunk_size` bytes
///
/// The last chunk may be smaller. An empty file yields no chunks.
pub fn split(file_size: u64, chunk_size: u64) -> Result<Vec<Chunk>, UploadError> {
    let count = chunk_count(file_size, chunk_size)?;

    Ok((0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            Chunk {
                index,
                start,
                end: (start + chunk_size).min(file_size),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_twelve_mb_in_five_mb_chunks() {
        let chunks = split(12 * MB, 5 * MB).unwrap();
        let sizes: Vec<u64> = chunks.iter().map(Chunk::size).collect();
        assert_eq!(sizes, vec![5 * MB, 5 * MB, 2 * MB]);
    }

    #[test]
    fn test_chunks_partition_file() {
        for file_size in [0u64, 1, 7, 8, 9, 64, 1000, 4097] {
            for chunk_size in [1u64, 3, 8, 1024] {
                let chunks = split(file_size, chunk_size).unwrap();

                let total: u64 = chunks.iter().map(Chunk::size).sum();
                assert_eq!(total, file_size);

                let mut expected_start = 0;
                for (i, chunk) in chunks.iter().enumerate() {
                    assert_eq!(chunk.index, i);
                    assert_eq!(chunk.start, expected_start);
                    assert!(chunk.size() > 0 && chunk.size() <= chunk_size);
                    expected_start = chunk.end;
                }
                assert_eq!(expected_start, file_size);
            }
        }
    }

    #[test]
    fn test_exact_multiple() {
        let chunks = split(16, 4).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3], Chunk { index: 3, start: 12, end: 16 });
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(split(10, 0), Err(UploadError::InvalidChunkSize)));
        assert!(matches!(chunk_count(10, 0), Err(UploadError::InvalidChunkSize)));
    }
}
