//! Storage nodes
//!
//! This module defines the contract every storage node honours, whether it
//! lives in this process or behind an HTTP endpoint, and the directory-backed
//! node implementation.

pub mod node;

pub use node::{NodeState, StorageNode};

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Live capacity report of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Bytes available for new chunks
    pub free_capacity: u64,
    /// Number of chunks currently stored
    pub chunk_count: u64,
}

/// Acknowledgement returned by a node for store and delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReceipt {
    pub status: String,
    pub chunk_id: String,
}

/// Chunk transfer contract of a storage node
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Address recorded in placement records for chunks stored here
    fn address(&self) -> &str;

    /// Store a chunk, overwriting any previous bytes under the same id
    async fn store(&self, chunk_id: &str, data: Vec<u8>) -> Result<()>;

    /// Fetch a chunk's bytes; `NotFound` if absent
    async fn fetch(&self, chunk_id: &str) -> Result<Vec<u8>>;

    /// Delete a chunk; `NotFound` if absent
    async fn delete(&self, chunk_id: &str) -> Result<()>;

    /// Free capacity and chunk count, read live
    async fn status(&self) -> Result<NodeStatus>;
}
