//! Placing a file's chunks across the fleet
//!
//! The record is committed only after every chunk has been stored. A failed
//! chunk aborts the upload; chunks stored before it stay where they are and
//! are reported as orphans in the error.

use crate::chunking::Chunk;
use crate::orchestrator::{sha256_hex, Orchestrator};
use crate::placement::{validate_file_name, ChunkPlacement, PlacementRecord};
use crate::{Error, Result};
use futures::future::join_all;
use std::io::ErrorKind;
use std::path::Path;

impl Orchestrator {
    /// Upload the file at `path` under its basename
    pub async fn upload_path(&self, path: &Path) -> Result<PlacementRecord> {
        let file = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("{} has no file name", path.display())))?;
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.upload(file, &data).await
    }

    /// Split `data`, place every chunk and commit the placement record
    pub async fn upload(&self, file: &str, data: &[u8]) -> Result<PlacementRecord> {
        validate_file_name(file)?;
        if self.metadata.exists(file).await? {
            return Err(Error::InvalidArgument(format!(
                "{file} is already placed; delete it first"
            )));
        }

        let chunks = self.codec.split(file, data);
        tracing::info!(file, bytes = data.len(), chunks = chunks.len(), "splitting file");

        let mut placed: Vec<ChunkPlacement> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.parallelism) {
            let results = join_all(batch.iter().map(|chunk| self.place(chunk))).await;

            let mut failure = None;
            for (chunk, result) in batch.iter().zip(results) {
                match result {
                    Ok(placement) => placed.push(placement),
                    Err(e) if failure.is_none() => failure = Some((chunk.id.to_string(), e)),
                    Err(e) => tracing::warn!(chunk_id = %chunk.id, "upload failed: {}", e),
                }
            }

            if let Some((chunk_id, source)) = failure {
                tracing::error!(
                    file,
                    chunk_id,
                    orphans = placed.len(),
                    "upload aborted: {}",
                    source
                );
                return Err(Error::UploadAborted {
                    file: file.to_string(),
                    chunk_id,
                    orphans: placed,
                    source: Box::new(source),
                });
            }
        }

        let record = PlacementRecord {
            file: file.to_string(),
            size: data.len() as u64,
            chunk_size: self.codec.chunk_size() as u64,
            sha256: sha256_hex(data),
            chunks: placed,
        };
        self.metadata.save(&record).await?;
        tracing::info!(file, chunks = record.chunks.len(), "file uploaded");
        Ok(record)
    }

    async fn place(&self, chunk: &Chunk) -> Result<ChunkPlacement> {
        let chunk_id = chunk.id.to_string();
        let receipt = self
            .placement
            .upload_chunk(&chunk_id, chunk.data.clone())
            .await?;
        tracing::info!(
            chunk_id,
            cluster = %receipt.cluster,
            node = %receipt.node,
            "uploaded chunk"
        );
        Ok(ChunkPlacement {
            chunk_id,
            index: chunk.id.index,
            cluster: receipt.cluster,
            node: receipt.node,
            size: chunk.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::orchestrator::fixture::{payload, Fleet};
    use crate::routing::{PlacementApi, PlacementReceipt};
    use crate::storage::NodeApi;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Passes calls through until the `fail_at`-th (zero-based), which fails
    struct FailAt {
        inner: Arc<dyn PlacementApi>,
        fail_at: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PlacementApi for FailAt {
        async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<PlacementReceipt> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(Error::upstream("cluster_1", "node went away"));
            }
            self.inner.upload_chunk(chunk_id, data).await
        }
    }

    fn failing_at(fail_at: usize) -> impl FnOnce(Arc<dyn PlacementApi>) -> Arc<dyn PlacementApi> {
        move |inner| -> Arc<dyn PlacementApi> {
            Arc::new(FailAt {
                inner,
                fail_at,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[tokio::test]
    async fn test_upload_commits_complete_record() {
        let fleet = Fleet::new(10);
        let data = payload(25);

        let record = fleet.orchestrator.upload("notes.txt", &data).await.unwrap();
        assert_eq!(record.chunks.len(), 3);
        assert_eq!(record.size, 25);
        assert_eq!(
            record.chunks.iter().map(|c| c.size).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );

        for chunk in &record.chunks {
            let node = fleet.node(&chunk.node);
            assert_eq!(node.fetch(&chunk.chunk_id).await.unwrap().len() as u64, chunk.size);
        }
        assert_eq!(fleet.orchestrator.metadata().load("notes.txt").await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_upload_dotfile() {
        let fleet = Fleet::new(10);

        let record = fleet.orchestrator.upload(".env", b"KEY=1").await.unwrap();
        assert_eq!(record.chunks[0].chunk_id, ".env_chunk00000");
        assert_eq!(fleet.stored_chunks().await, vec![".env_chunk00000"]);
        assert_eq!(fleet.orchestrator.metadata().list().await.unwrap(), vec![".env"]);

        let download = fleet.orchestrator.download(".env", None).await.unwrap();
        assert_eq!(download.data, b"KEY=1");
        assert!(download.output.ends_with(".env_reconstructed"));
    }

    #[tokio::test]
    async fn test_failed_chunk_leaves_orphans_and_no_record() {
        let k = 2;
        let fleet = Fleet::build(10, 1, failing_at(k));
        let data = payload(45);

        let err = fleet.orchestrator.upload("big.bin", &data).await.unwrap_err();
        match err {
            Error::UploadAborted {
                chunk_id, orphans, ..
            } => {
                assert_eq!(chunk_id, "big.bin_chunk00002");
                assert_eq!(orphans.len(), k);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(!fleet.orchestrator.metadata().exists("big.bin").await.unwrap());
        assert_eq!(
            fleet.stored_chunks().await,
            vec!["big.bin_chunk00000", "big.bin_chunk00001"]
        );
    }

    #[tokio::test]
    async fn test_upload_with_all_nodes_down() {
        let fleet = Fleet::new(10);
        for node in &fleet.nodes {
            node.fail();
        }

        let err = fleet.orchestrator.upload("x.bin", &payload(30)).await.unwrap_err();
        assert!(matches!(err, Error::UploadAborted { ref orphans, .. } if orphans.is_empty()));
        assert!(!fleet.orchestrator.metadata().exists("x.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_refuses_placed_file() {
        let fleet = Fleet::new(10);
        fleet.orchestrator.upload("a.txt", b"hello").await.unwrap();

        assert!(matches!(
            fleet.orchestrator.upload("a.txt", b"again").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_parallel_upload_keeps_order() {
        let fleet = Fleet::build(4, 3, |global| global);
        let data = payload(37);

        let record = fleet.orchestrator.upload("par.bin", &data).await.unwrap();
        let indices: Vec<u64> = record.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<u64>>());
        assert_eq!(fleet.stored_chunks().await.len(), 10);
    }

    #[tokio::test]
    async fn test_parallel_failure_reports_every_stored_chunk() {
        let fleet = Fleet::build(4, 4, failing_at(5));
        let err = fleet
            .orchestrator
            .upload("p.bin", &payload(40))
            .await
            .unwrap_err();

        let Error::UploadAborted { orphans, .. } = err else {
            panic!("expected an aborted upload");
        };
        // first batch of four plus the three batch-mates of the failed call
        assert_eq!(orphans.len(), 7);
        assert_eq!(fleet.stored_chunks().await.len(), 7);
    }

    #[tokio::test]
    async fn test_upload_path_uses_basename() {
        let fleet = Fleet::new(8);
        let path = fleet.dir.path().join("input.dat");
        std::fs::write(&path, payload(20)).unwrap();

        let record = fleet.orchestrator.upload_path(&path).await.unwrap();
        assert_eq!(record.file, "input.dat");
        assert_eq!(record.chunks[0].chunk_id, "input.dat_chunk00000");

        let missing = fleet.dir.path().join("absent.dat");
        assert!(fleet.orchestrator.upload_path(&missing).await.unwrap_err().is_not_found());
    }
}
