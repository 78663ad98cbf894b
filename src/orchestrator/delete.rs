//! Removing a placed file from the fleet

use crate::orchestrator::Orchestrator;
use crate::placement::ChunkPlacement;
use crate::routing::within;
use crate::{Error, Result};

/// Outcome of a delete that removed every chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub file: String,
    /// Chunks removed by this call
    pub deleted: Vec<String>,
    /// Chunks their node no longer held
    pub already_absent: Vec<String>,
}

impl Orchestrator {
    /// Delete every chunk of `file`, then its record and local copies.
    ///
    /// Each chunk is attempted even after another one fails. If any chunk
    /// could not be removed the record is kept, so the delete can be re-run.
    pub async fn delete(&self, file: &str) -> Result<DeleteReport> {
        let record = self.metadata.load(file).await?;
        tracing::info!(file, chunks = record.chunks.len(), "deleting file");

        let (mut report, failed) = self.delete_chunks(&record.chunks).await;
        report.file = file.to_string();
        if !failed.is_empty() {
            tracing::error!(file, failed = failed.len(), "delete incomplete, record kept");
            return Err(Error::PartialFailure {
                file: file.to_string(),
                attempted: record.chunks.len(),
                failed,
            });
        }

        self.metadata.remove(file).await?;
        if let Err(e) = self.cache.purge(file, &record.chunk_ids()).await {
            tracing::warn!(file, "failed to purge local cache: {}", e);
        }
        tracing::info!(
            file,
            deleted = report.deleted.len(),
            absent = report.already_absent.len(),
            "file deleted"
        );
        Ok(report)
    }

    /// Delete chunks left behind by an aborted upload of `file`
    pub async fn reclaim_orphans(
        &self,
        file: &str,
        orphans: &[ChunkPlacement],
    ) -> Result<DeleteReport> {
        let (mut report, failed) = self.delete_chunks(orphans).await;
        report.file = file.to_string();
        if !failed.is_empty() {
            return Err(Error::PartialFailure {
                file: file.to_string(),
                attempted: orphans.len(),
                failed,
            });
        }
        tracing::info!(file, reclaimed = report.deleted.len(), "orphaned chunks reclaimed");
        Ok(report)
    }

    async fn delete_chunks(&self, chunks: &[ChunkPlacement]) -> (DeleteReport, Vec<String>) {
        let mut report = DeleteReport::default();
        let mut failed = Vec::new();
        for placement in chunks {
            match self.delete_chunk(placement).await {
                Ok(()) => {
                    tracing::info!(chunk_id = %placement.chunk_id, node = %placement.node, "deleted chunk");
                    report.deleted.push(placement.chunk_id.clone());
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(chunk_id = %placement.chunk_id, node = %placement.node, "chunk already absent");
                    report.already_absent.push(placement.chunk_id.clone());
                }
                Err(e) => {
                    tracing::error!(chunk_id = %placement.chunk_id, node = %placement.node, "failed to delete chunk: {}", e);
                    failed.push(placement.chunk_id.clone());
                }
            }
        }
        (report, failed)
    }

    async fn delete_chunk(&self, placement: &ChunkPlacement) -> Result<()> {
        let node = self.connector.node(&placement.node)?;
        within(self.timeout, &placement.node, node.delete(&placement.chunk_id)).await
    }
}
