//! Chunkfleet
//!
//! A small distributed file store. Files are split into fixed-size chunks
//! and placed, one chunk at a time, through two routing tiers: a global
//! router that picks the cluster with the most free capacity, and a cluster
//! router that picks the least loaded storage node in that cluster. A
//! client-side orchestrator records where every chunk went and uses that
//! record to reassemble or delete the file later.

pub mod api;
pub mod chunking;
pub mod error;
pub mod orchestrator;
pub mod placement;
pub mod routing;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chunking::{ChunkCodec, ChunkId};
pub use error::Error;
pub use orchestrator::Orchestrator;
pub use placement::{MetadataStore, PlacementRecord};
pub use routing::{ClusterRouter, GlobalRouter, RoutingConfig};
pub use storage::{NodeApi, StorageNode};

use std::time::Duration;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Subdirectory holding in-flight writes until they are renamed into place
pub(crate) const STAGING_DIR: &str = ".staging";

/// `.`, `..` and anything with a separator cannot name a single entry
pub(crate) fn is_plain_name(name: &str) -> bool {
    !matches!(name, "." | "..") && !name.contains(['/', '\\', '\0'])
}

/// Client-side tunables
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of each chunk in bytes
    pub chunk_size: usize,
    /// Bytes of free capacity one stored chunk counts against a node
    pub chunk_penalty: u64,
    /// Scores closer than this are tied
    pub epsilon: f64,
    /// Deadline for any single remote call
    pub timeout: Duration,
    /// Chunks uploaded concurrently
    pub parallelism: usize,
}

impl Default for Config {
    fn default() -> Self {
        let routing = RoutingConfig::default();
        Self {
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
            chunk_penalty: routing.chunk_penalty,
            epsilon: routing.epsilon,
            timeout: routing.timeout,
            parallelism: 1,
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "chunk size must be greater than 0".into(),
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::InvalidArgument(
                "tie epsilon must be a positive number".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "timeout must be greater than 0".into(),
            ));
        }
        if self.parallelism == 0 {
            return Err(Error::InvalidArgument(
                "parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The node-selection settings routers should share
    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            chunk_penalty: self.chunk_penalty,
            epsilon: self.epsilon,
            timeout: self.timeout,
        }
    }
}
