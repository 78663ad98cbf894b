//! Client-side artifacts of downloads
//!
//! Fetched chunks are kept in a chunk directory and reconstructed files land
//! in an output directory. Both are purged when the file is deleted.

use crate::chunking::ChunkId;
use crate::{Result, STAGING_DIR};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct LocalCache {
    chunk_dir: PathBuf,
    output_dir: PathBuf,
}

impl LocalCache {
    pub fn new(chunk_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_dir: chunk_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.chunk_dir.join(id.to_string())
    }

    /// `report.pdf` reconstructs to `report_reconstructed.pdf`
    pub fn output_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        let name = match path.extension() {
            Some(ext) => format!("{stem}_reconstructed.{}", ext.to_string_lossy()),
            None => format!("{stem}_reconstructed"),
        };
        self.output_dir.join(name)
    }

    pub async fn put_chunk(&self, id: &ChunkId, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.chunk_dir).await?;
        fs::write(self.chunk_path(id), data).await?;
        Ok(())
    }

    /// Write the reconstructed file, replacing any earlier copy
    pub async fn put_output(&self, file: &str, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_path(file);
        let staging_dir = self.output_dir.join(STAGING_DIR);
        fs::create_dir_all(&staging_dir).await?;
        let staging = staging_dir.join(file);
        fs::write(&staging, data).await?;
        fs::rename(&staging, &path).await?;
        Ok(path)
    }

    /// Remove cached chunks; absent ones are skipped
    pub async fn remove_chunks(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if remove_if_present(&self.chunk_path(id)).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every cached chunk and the reconstructed output of `file`
    pub async fn purge(&self, file: &str, ids: &[ChunkId]) -> Result<()> {
        let chunks = self.remove_chunks(ids).await?;
        let output = self.output_path(file);
        if remove_if_present(&output).await? {
            tracing::info!(path = %output.display(), "deleted reconstructed file");
        }
        tracing::debug!(file, chunks, "local cache purged");
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
