//! Fetching and reassembling a placed file

use crate::chunking::{self, ChunkId};
use crate::orchestrator::{sha256_hex, Orchestrator};
use crate::placement::{ChunkPlacement, PlacementRecord};
use crate::routing::within;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// A reconstructed file
#[derive(Debug, Clone)]
pub struct Download {
    pub file: String,
    pub data: Vec<u8>,
    pub sha256: String,
    /// Where the reconstructed copy was written
    pub output: PathBuf,
}

impl Orchestrator {
    /// Fetch every chunk of `file` in sequence order and reassemble it.
    ///
    /// When `expected_sha256` is given the result must match it; the digest
    /// stored in the record is always checked. Nothing is written to the
    /// output directory unless every chunk was fetched.
    pub async fn download(&self, file: &str, expected_sha256: Option<&str>) -> Result<Download> {
        let record = self.metadata.load(file).await?;
        record.validate()?;
        tracing::info!(file, chunks = record.chunks.len(), "downloading file");

        let mut fetched: Vec<ChunkId> = Vec::with_capacity(record.chunks.len());
        let mut blobs: HashMap<ChunkId, Vec<u8>> = HashMap::with_capacity(record.chunks.len());
        for placement in record.ordered() {
            let id = ChunkId::new(&record.file, placement.index);
            let data = match self.fetch_chunk(placement).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(file, chunk_id = %placement.chunk_id, node = %placement.node, "download failed: {}", e);
                    self.discard(&fetched).await;
                    return Err(e);
                }
            };
            if let Err(e) = self.cache.put_chunk(&id, &data).await {
                self.discard(&fetched).await;
                return Err(e);
            }
            fetched.push(id.clone());
            blobs.insert(id, data);
        }

        match self.assemble(&record, &fetched, blobs, expected_sha256).await {
            Ok(download) => {
                tracing::info!(file, path = %download.output.display(), bytes = download.data.len(), "file reconstructed");
                Ok(download)
            }
            Err(e) => {
                tracing::error!(file, "reconstruction failed: {}", e);
                self.discard(&fetched).await;
                Err(e)
            }
        }
    }

    /// Concatenate fetched chunks, check digests and write the output
    async fn assemble(
        &self,
        record: &PlacementRecord,
        fetched: &[ChunkId],
        mut blobs: HashMap<ChunkId, Vec<u8>>,
        expected_sha256: Option<&str>,
    ) -> Result<Download> {
        let data = chunking::reconstruct(fetched, |id| {
            blobs
                .remove(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))
        })?;
        let sha256 = self.verify(record, &data, expected_sha256)?;

        let output = self.cache.put_output(&record.file, &data).await?;
        Ok(Download {
            file: record.file.clone(),
            data,
            sha256,
            output,
        })
    }

    async fn fetch_chunk(&self, placement: &ChunkPlacement) -> Result<Vec<u8>> {
        let node = self.connector.node(&placement.node)?;
        let data = within(self.timeout, &placement.node, node.fetch(&placement.chunk_id)).await?;
        if data.len() as u64 != placement.size {
            return Err(Error::upstream(
                placement.node.as_str(),
                format!(
                    "{} is {} bytes, expected {}",
                    placement.chunk_id,
                    data.len(),
                    placement.size
                ),
            ));
        }
        tracing::debug!(chunk_id = %placement.chunk_id, node = %placement.node, "fetched chunk");
        Ok(data)
    }

    fn verify(&self, record: &PlacementRecord, data: &[u8], expected: Option<&str>) -> Result<String> {
        let actual = sha256_hex(data);
        for expected in [Some(record.sha256.as_str()), expected].into_iter().flatten() {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Error::DigestMismatch {
                    file: record.file.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(actual)
    }

    /// Drop chunks cached by a failed attempt
    async fn discard(&self, fetched: &[ChunkId]) {
        if let Err(e) = self.cache.remove_chunks(fetched).await {
            tracing::warn!("failed to clean chunk cache: {}", e);
        }
    }
}
