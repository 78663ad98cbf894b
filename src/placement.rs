//! Durable placement records
//!
//! A placement record maps every chunk of one file to the node holding it.
//! Records are written whole, through a temp file and a rename, so a reader
//! sees either no record or a complete one.

use crate::chunking::ChunkId;
use crate::{is_plain_name, Error, Result, STAGING_DIR};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Where one chunk of a file was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlacement {
    pub chunk_id: String,
    /// Sequence index of the chunk within its file
    pub index: u64,
    pub cluster: String,
    /// Address of the node holding the chunk
    pub node: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    /// Basename of the placed file
    pub file: String,
    pub size: u64,
    pub chunk_size: u64,
    /// Hex SHA-256 of the original bytes
    pub sha256: String,
    pub chunks: Vec<ChunkPlacement>,
}

impl PlacementRecord {
    /// Chunks sorted by sequence index
    pub fn ordered(&self) -> Vec<&ChunkPlacement> {
        let mut chunks: Vec<&ChunkPlacement> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.index);
        chunks
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.ordered()
            .into_iter()
            .map(|c| ChunkId::new(&self.file, c.index))
            .collect()
    }

    /// Check that indices run 0..n without gaps and ids are unique
    pub fn validate(&self) -> Result<()> {
        validate_file_name(&self.file)?;
        let mut ids = HashSet::new();
        for (expected, chunk) in self.ordered().into_iter().enumerate() {
            if chunk.index != expected as u64 {
                return Err(Error::InvalidArgument(format!(
                    "record for {} is missing chunk index {expected}",
                    self.file
                )));
            }
            if !ids.insert(chunk.chunk_id.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "record for {} lists {} twice",
                    self.file, chunk.chunk_id
                )));
            }
        }
        Ok(())
    }
}

/// Reject names that cannot be used as a single path component
pub fn validate_file_name(file: &str) -> Result<()> {
    if file.is_empty() {
        return Err(Error::MissingInput("file name".into()));
    }
    if !is_plain_name(file) {
        return Err(Error::InvalidArgument(format!(
            "{file:?} is not a plain file name"
        )));
    }
    Ok(())
}

/// Directory of placement records, one JSON file per placed file
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, file: &str) -> Result<PathBuf> {
        validate_file_name(file)?;
        Ok(self.dir.join(format!("{file}.json")))
    }

    pub async fn exists(&self, file: &str) -> Result<bool> {
        Ok(fs::try_exists(self.record_path(file)?).await?)
    }

    /// Persist a complete record, replacing any previous one
    pub async fn save(&self, record: &PlacementRecord) -> Result<PathBuf> {
        record.validate()?;
        let path = self.record_path(&record.file)?;
        fs::create_dir_all(&self.dir).await?;

        let staging_dir = self.dir.join(STAGING_DIR);
        fs::create_dir_all(&staging_dir).await?;
        let staging = staging_dir.join(format!("{}.json", record.file));
        fs::write(&staging, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&staging, &path).await?;

        tracing::info!(file = %record.file, chunks = record.chunks.len(), "placement record saved");
        Ok(path)
    }

    pub async fn load(&self, file: &str) -> Result<PlacementRecord> {
        let path = self.record_path(file)?;
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("placement record for {file}")))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn remove(&self, file: &str) -> Result<()> {
        let path = self.record_path(file)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file, "placement record removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("placement record for {file}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all placed files, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(file) = name.strip_suffix(".json") {
                files.push(file.to_string());
            }
        }
        files.sort();
        Ok(files)
    }
}
