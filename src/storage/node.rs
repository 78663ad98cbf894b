//! Storage node implementation
//!
//! A storage node owns one directory and keeps each chunk in a file named
//! after its id. Capacity is read from the filesystem on every status call.

use crate::storage::{NodeApi, NodeStatus};
use crate::{is_plain_name, Error, Result, STAGING_DIR};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;

/// Reachability of an in-process node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Node answers every call
    Online,
    /// Node answers nothing, as if the process were down
    Offline,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Online => write!(f, "Online"),
            NodeState::Offline => write!(f, "Offline"),
        }
    }
}

/// A storage node backed by a local chunk directory
#[derive(Debug)]
pub struct StorageNode {
    /// Address other tiers use to reach this node
    address: String,
    /// Directory holding one file per chunk
    root: PathBuf,
    online: AtomicBool,
}

impl StorageNode {
    /// Create a node over `root`; the directory is created on first store
    pub fn new(address: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            root: root.into(),
            online: AtomicBool::new(true),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> NodeState {
        if self.online.load(Ordering::SeqCst) {
            NodeState::Online
        } else {
            NodeState::Offline
        }
    }

    /// Take the node offline; every call fails as unreachable until `recover`
    pub fn fail(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    /// Ids of all stored chunks, sorted
    pub async fn list_chunks(&self) -> Result<Vec<String>> {
        self.ensure_online()?;
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn ensure_online(&self) -> Result<()> {
        match self.state() {
            NodeState::Online => Ok(()),
            NodeState::Offline => Err(Error::unreachable(&self.address, "node is offline")),
        }
    }

    fn chunk_path(&self, chunk_id: &str) -> Result<PathBuf> {
        validate_chunk_id(chunk_id)?;
        Ok(self.root.join(chunk_id))
    }

    fn free_capacity(&self) -> Result<u64> {
        let probe = if self.root.exists() {
            self.root.as_path()
        } else {
            self.root.parent().unwrap_or_else(|| Path::new("."))
        };
        let stat = nix::sys::statvfs::statvfs(probe).map_err(std::io::Error::from)?;
        Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
    }
}

/// Reject ids that are empty or would resolve outside the chunk directory
pub fn validate_chunk_id(chunk_id: &str) -> Result<()> {
    if chunk_id.is_empty() {
        return Err(Error::MissingInput("chunk_id".into()));
    }
    if !is_plain_name(chunk_id) || chunk_id == STAGING_DIR {
        return Err(Error::InvalidArgument(format!(
            "chunk id {chunk_id:?} is not a plain file name"
        )));
    }
    Ok(())
}

#[async_trait]
impl NodeApi for StorageNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn store(&self, chunk_id: &str, data: Vec<u8>) -> Result<()> {
        self.ensure_online()?;
        let path = self.chunk_path(chunk_id)?;
        fs::create_dir_all(&self.root).await?;

        let staging_dir = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging_dir).await?;
        let staging = staging_dir.join(chunk_id);
        fs::write(&staging, &data).await?;
        fs::rename(&staging, &path).await?;

        tracing::debug!(node = %self.address, chunk_id, bytes = data.len(), "stored chunk");
        Ok(())
    }

    async fn fetch(&self, chunk_id: &str) -> Result<Vec<u8>> {
        self.ensure_online()?;
        let path = self.chunk_path(chunk_id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(chunk_id.into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        self.ensure_online()?;
        let path = self.chunk_path(chunk_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(node = %self.address, chunk_id, "deleted chunk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(chunk_id.into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn status(&self) -> Result<NodeStatus> {
        self.ensure_online()?;
        let chunk_count = self.list_chunks().await?.len() as u64;
        Ok(NodeStatus {
            free_capacity: self.free_capacity()?,
            chunk_count,
        })
    }
}
