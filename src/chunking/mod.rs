//! Fixed-size chunking of byte streams
//!
//! This module splits a file's bytes into an ordered sequence of chunks and
//! reassembles them. Every chunk but the last has exactly `chunk_size`
//! bytes; the last holds the remainder.

use crate::{Error, Result};
use std::fmt;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Identity of a chunk: the file it belongs to and its position in that file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    /// Basename of the source file
    pub file: String,
    /// Zero-based sequence index within the file
    pub index: u64,
}

impl ChunkId {
    pub fn new(file: impl Into<String>, index: u64) -> Self {
        Self {
            file: file.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_chunk{:05}", self.file, self.index)
    }
}

/// A contiguous slice of a file together with its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits and reassembles files with a fixed chunk size
#[derive(Debug, Clone, Copy)]
pub struct ChunkCodec {
    chunk_size: usize,
}

impl ChunkCodec {
    /// Create a codec; `chunk_size` must be greater than 0
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "chunk size must be greater than 0".into(),
            ));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks `split` produces for `len` bytes
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    pub fn split(&self, file: &str, data: &[u8]) -> Vec<Chunk> {
        data.chunks(self.chunk_size)
            .enumerate()
            .map(|(i, slice)| Chunk {
                id: ChunkId::new(file, i as u64),
                data: slice.to_vec(),
            })
            .collect()
    }
}

/// Split `data` into chunks of `chunk_size` bytes named after `file`
pub fn split(file: &str, data: &[u8], chunk_size: usize) -> Result<Vec<Chunk>> {
    Ok(ChunkCodec::new(chunk_size)?.split(file, data))
}

/// Concatenate the bytes `resolver` returns for each id, in the order given.
///
/// The order of `ids` is taken as-is; callers holding an unordered mapping
/// must sort by [`ChunkId::index`] first.
pub fn reconstruct<'a, I, F>(ids: I, mut resolver: F) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a ChunkId>,
    F: FnMut(&ChunkId) -> Result<Vec<u8>>,
{
    let mut out = Vec::new();
    for id in ids {
        out.extend_from_slice(&resolver(id)?);
    }
    Ok(out)
}
