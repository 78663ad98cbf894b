//! File-level orchestration across the fleet
//!
//! An [`Orchestrator`] drives whole-file operations: placing every chunk of a
//! file and committing its record, fetching and reassembling a placed file,
//! and deleting a placed file's chunks and record. Remote calls are issued
//! one chunk at a time unless upload parallelism is raised.

pub mod cache;
pub mod delete;
pub mod download;
pub mod upload;

pub use cache::LocalCache;
pub use delete::DeleteReport;
pub use download::Download;

use crate::chunking::ChunkCodec;
use crate::placement::MetadataStore;
use crate::routing::PlacementApi;
use crate::transport::Connector;
use crate::{Config, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Coordinates uploads, downloads and deletes for one client
pub struct Orchestrator {
    /// Entry point for chunk placement (normally the global router)
    placement: Arc<dyn PlacementApi>,
    /// Resolves recorded node addresses
    connector: Arc<dyn Connector>,
    metadata: MetadataStore,
    cache: LocalCache,
    codec: ChunkCodec,
    timeout: Duration,
    /// Chunks forwarded concurrently during upload
    parallelism: usize,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        placement: Arc<dyn PlacementApi>,
        connector: Arc<dyn Connector>,
        metadata: MetadataStore,
        cache: LocalCache,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            placement,
            connector,
            metadata,
            cache,
            codec: ChunkCodec::new(config.chunk_size)?,
            timeout: config.timeout,
            parallelism: config.parallelism,
        })
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn codec(&self) -> &ChunkCodec {
        &self.codec
    }
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use crate::routing::{ClusterApi, ClusterRouter, GlobalRouter, RoutingConfig};
    use crate::storage::{NodeApi, StorageNode};
    use crate::transport::LocalFleet;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Two clusters of two directory-backed nodes each, wired in-process
    pub(crate) struct Fleet {
        pub(crate) dir: TempDir,
        pub(crate) nodes: Vec<Arc<StorageNode>>,
        pub(crate) orchestrator: Orchestrator,
    }

    impl Fleet {
        pub(crate) fn new(chunk_size: usize) -> Self {
            Self::build(chunk_size, 1, |global| global)
        }

        /// `wrap` may interpose on the placement entry point
        pub(crate) fn build<F>(chunk_size: usize, parallelism: usize, wrap: F) -> Self
        where
            F: FnOnce(Arc<dyn PlacementApi>) -> Arc<dyn PlacementApi>,
        {
            let dir = tempfile::tempdir().unwrap();
            let config = Config {
                chunk_size,
                timeout: Duration::from_millis(500),
                parallelism,
                ..Config::default()
            };
            let routing: RoutingConfig = config.routing();

            let mut nodes = Vec::new();
            let mut clusters: BTreeMap<String, Arc<dyn ClusterApi>> = BTreeMap::new();
            for c in 1..=2 {
                let members: Vec<Arc<StorageNode>> = (1..=2)
                    .map(|n| {
                        let address = format!("local://cluster_{c}/node_{n}");
                        let root = dir.path().join(format!("c{c}n{n}"));
                        Arc::new(StorageNode::new(address, root))
                    })
                    .collect();
                let apis: Vec<Arc<dyn NodeApi>> = members
                    .iter()
                    .map(|n| n.clone() as Arc<dyn NodeApi>)
                    .collect();
                let router = ClusterRouter::new(format!("local://cluster_{c}"), apis, routing)
                    .with_rng(c as u64);
                clusters.insert(format!("cluster_{c}"), Arc::new(router));
                nodes.extend(members);
            }

            let fleet: LocalFleet = nodes
                .iter()
                .map(|n| n.clone() as Arc<dyn NodeApi>)
                .collect();
            let global: Arc<dyn PlacementApi> =
                Arc::new(GlobalRouter::new(clusters, routing.timeout));
            let orchestrator = Orchestrator::new(
                &config,
                wrap(global),
                Arc::new(fleet),
                MetadataStore::new(dir.path().join("metadata")),
                LocalCache::new(dir.path().join("chunks"), dir.path().join("output")),
            )
            .unwrap();

            Self {
                dir,
                nodes,
                orchestrator,
            }
        }

        pub(crate) fn node(&self, address: &str) -> &Arc<StorageNode> {
            self.nodes
                .iter()
                .find(|n| n.address() == address)
                .unwrap()
        }

        /// Ids of every chunk stored anywhere in the fleet
        pub(crate) async fn stored_chunks(&self) -> Vec<String> {
            let mut all = Vec::new();
            for node in &self.nodes {
                all.extend(node.list_chunks().await.unwrap());
            }
            all.sort();
            all
        }
    }

    pub(crate) fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }
}
