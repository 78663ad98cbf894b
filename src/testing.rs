//! Scripted stand-ins for nodes and clusters used by unit tests

use crate::routing::{ClusterApi, ClusterReceipt, ClusterStatus};
use crate::storage::{NodeApi, NodeStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Behaviour {
    Healthy,
    /// Every call fails at the transport level
    Down,
    /// Every call hangs for this long
    Slow(Duration),
    /// Status answers, store fails
    RejectStore,
}

pub(crate) struct FakeNode {
    address: String,
    status: Mutex<NodeStatus>,
    behaviour: Mutex<Behaviour>,
    chunks: Mutex<HashMap<String, Vec<u8>>>,
    pub(crate) status_calls: AtomicUsize,
}

impl FakeNode {
    pub(crate) fn new(address: &str, free_capacity: u64, chunk_count: u64) -> Self {
        Self {
            address: address.to_string(),
            status: Mutex::new(NodeStatus {
                free_capacity,
                chunk_count,
            }),
            behaviour: Mutex::new(Behaviour::Healthy),
            chunks: Mutex::new(HashMap::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with(self, behaviour: Behaviour) -> Self {
        self.set(behaviour);
        self
    }

    pub(crate) fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub(crate) fn stored(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chunks.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn gate(&self) -> Result<Behaviour> {
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Down => Err(Error::unreachable(&self.address, "connection refused")),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(behaviour)
            }
            _ => Ok(behaviour),
        }
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn store(&self, chunk_id: &str, data: Vec<u8>) -> Result<()> {
        if self.gate().await? == Behaviour::RejectStore {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.chunks.lock().unwrap().insert(chunk_id.to_string(), data);
        Ok(())
    }

    async fn fetch(&self, chunk_id: &str) -> Result<Vec<u8>> {
        self.gate().await?;
        self.chunks
            .lock()
            .unwrap()
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(chunk_id.to_string()))
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        self.gate().await?;
        self.chunks
            .lock()
            .unwrap()
            .remove(chunk_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(chunk_id.to_string()))
    }

    async fn status(&self) -> Result<NodeStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        Ok(*self.status.lock().unwrap())
    }
}

pub(crate) struct FakeCluster {
    address: String,
    status: ClusterStatus,
    behaviour: Mutex<Behaviour>,
    pub(crate) uploads: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub(crate) fn new(address: &str, cluster_free: u64) -> Self {
        Self {
            address: address.to_string(),
            status: ClusterStatus {
                cluster_free,
                cluster_chunk_count: 0,
                active_nodes: 1,
            },
            behaviour: Mutex::new(Behaviour::Healthy),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with(self, behaviour: Behaviour) -> Self {
        *self.behaviour.lock().unwrap() = behaviour;
        self
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    fn address(&self) -> &str {
        &self.address
    }

    async fn upload_chunk(&self, chunk_id: &str, _data: Vec<u8>) -> Result<ClusterReceipt> {
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Down => return Err(Error::unreachable(&self.address, "connection refused")),
            Behaviour::RejectStore => {
                return Err(Error::upstream(format!("{}/n1", self.address), "disk full"))
            }
            Behaviour::Slow(delay) => tokio::time::sleep(delay).await,
            Behaviour::Healthy => {}
        }
        self.uploads.lock().unwrap().push(chunk_id.to_string());
        Ok(ClusterReceipt {
            status: "stored".into(),
            node: format!("{}/n1", self.address),
            chunk_id: chunk_id.to_string(),
        })
    }

    async fn status(&self) -> Result<ClusterStatus> {
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Down => Err(Error::unreachable(&self.address, "connection refused")),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.status)
            }
            _ => Ok(self.status),
        }
    }
}
