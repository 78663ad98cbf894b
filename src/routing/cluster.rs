//! Cluster-level routing across a fixed set of storage nodes
//!
//! A cluster router probes every member node, scores the ones that answered
//! and stores each chunk on the best of them. Membership is fixed at
//! construction.

use crate::routing::{
    check_upload, score, select_best, within, ClusterApi, ClusterReceipt, ClusterStatus,
    RoutingConfig,
};
use crate::storage::{NodeApi, NodeStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

/// A node that answered the current probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedNode {
    /// Position in the router's node list
    pub index: usize,
    pub address: String,
    pub status: NodeStatus,
    pub score: f64,
}

/// Routes chunks to the best-scoring node of one cluster
pub struct ClusterRouter {
    /// Address this cluster is reachable at
    address: String,
    nodes: Vec<Arc<dyn NodeApi>>,
    config: RoutingConfig,
    /// Tie-break source; never held across an await
    rng: Mutex<StdRng>,
}

impl ClusterRouter {
    /// Create a router over `nodes` with an entropy-seeded tie-break
    pub fn new(
        address: impl Into<String>,
        nodes: Vec<Arc<dyn NodeApi>>,
        config: RoutingConfig,
    ) -> Self {
        if nodes.is_empty() {
            tracing::warn!("cluster router created without nodes");
        }
        Self {
            address: address.into(),
            nodes,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the tie-break source with a seeded one
    pub fn with_rng(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_addresses(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.address().to_string()).collect()
    }

    /// Probe every node concurrently; unreachable nodes are left out.
    ///
    /// One round takes at most one timeout however many nodes hang.
    pub async fn probe(&self) -> Vec<ProbedNode> {
        let results = join_all(
            self.nodes
                .iter()
                .map(|node| within(self.config.timeout, node.address(), node.status())),
        )
        .await;

        let mut probed = Vec::with_capacity(self.nodes.len());
        for (index, (node, result)) in self.nodes.iter().zip(results).enumerate() {
            match result {
                Ok(status) => probed.push(ProbedNode {
                    index,
                    address: node.address().to_string(),
                    status,
                    score: score(&status, self.config.chunk_penalty),
                }),
                Err(e) => {
                    tracing::warn!(node = node.address(), "node unreachable: {}", e);
                }
            }
        }
        probed
    }

    /// Choose the node a new chunk should go to
    pub async fn select(&self) -> Result<ProbedNode> {
        let probed = self.probe().await;

        let best = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            select_best(&probed, |n| n.score, self.config.epsilon, &mut *rng).cloned()
        };

        match best {
            Some(node) => {
                tracing::info!(
                    node = %node.address,
                    score = node.score,
                    free = node.status.free_capacity,
                    chunks = node.status.chunk_count,
                    "selected node"
                );
                Ok(node)
            }
            None => Err(Error::ServiceUnavailable(format!(
                "no reachable nodes in cluster {}",
                self.address
            ))),
        }
    }

    /// Store a chunk on the selected node and return that node's address.
    ///
    /// A failed store is not retried on another node.
    pub async fn forward(&self, chunk_id: &str, data: Vec<u8>) -> Result<String> {
        check_upload(chunk_id, &data)?;
        let selected = self.select().await?;
        let node = self
            .nodes
            .get(selected.index)
            .ok_or_else(|| Error::ServiceUnavailable(selected.address.clone()))?;

        match within(self.config.timeout, node.address(), node.store(chunk_id, data)).await {
            Ok(()) => {
                tracing::info!(chunk_id, node = %selected.address, "forwarded chunk");
                Ok(selected.address)
            }
            Err(e) => {
                tracing::error!(chunk_id, node = %selected.address, "upload to node failed: {}", e);
                Err(Error::upstream(selected.address, e))
            }
        }
    }

    /// Capacity summed over the nodes reachable right now
    pub async fn status(&self) -> ClusterStatus {
        self.probe()
            .await
            .iter()
            .fold(ClusterStatus::default(), |mut acc, node| {
                acc.cluster_free += node.status.free_capacity;
                acc.cluster_chunk_count += node.status.chunk_count;
                acc.active_nodes += 1;
                acc
            })
    }
}

#[async_trait]
impl ClusterApi for ClusterRouter {
    fn address(&self) -> &str {
        &self.address
    }

    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<ClusterReceipt> {
        let node = self.forward(chunk_id, data).await?;
        Ok(ClusterReceipt {
            status: "stored".into(),
            node,
            chunk_id: chunk_id.to_string(),
        })
    }

    async fn status(&self) -> Result<ClusterStatus> {
        Ok(ClusterRouter::status(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Behaviour, FakeNode};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> RoutingConfig {
        RoutingConfig {
            chunk_penalty: 50,
            timeout: Duration::from_millis(100),
            ..RoutingConfig::default()
        }
    }

    fn router(nodes: &[Arc<FakeNode>]) -> ClusterRouter {
        let nodes: Vec<Arc<dyn NodeApi>> = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn NodeApi>)
            .collect();
        ClusterRouter::new("http://cluster_1", nodes, config()).with_rng(3)
    }

    #[tokio::test]
    async fn test_select_highest_score() {
        let nodes = vec![
            Arc::new(FakeNode::new("n1", 1_000, 0)),
            // more free space but heavily loaded: 2_000 - 30 * 50 = 500
            Arc::new(FakeNode::new("n2", 2_000, 30)),
            Arc::new(FakeNode::new("n3", 1_200, 2)),
        ];
        let router = router(&nodes);

        for _ in 0..10 {
            assert_eq!(router.select().await.unwrap().address, "n3");
        }
    }

    #[tokio::test]
    async fn test_select_probes_every_time() {
        let nodes = vec![Arc::new(FakeNode::new("n1", 1_000, 0))];
        let router = router(&nodes);

        router.select().await.unwrap();
        router.select().await.unwrap();
        assert_eq!(nodes[0].status_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_nodes_are_dropped() {
        let nodes = vec![
            Arc::new(FakeNode::new("down", 1_000_000, 0).with(Behaviour::Down)),
            Arc::new(FakeNode::new("slow", 1_000_000, 0).with(Behaviour::Slow(Duration::from_secs(2)))),
            Arc::new(FakeNode::new("ok", 10, 0)),
        ];
        let router = router(&nodes);

        let chosen = router.select().await.unwrap();
        assert_eq!(chosen.address, "ok");

        let status = router.status().await;
        assert_eq!(status.active_nodes, 1);
        assert_eq!(status.cluster_free, 10);
    }

    #[tokio::test]
    async fn test_hung_nodes_are_probed_concurrently() {
        let slow = Behaviour::Slow(Duration::from_secs(2));
        let nodes = vec![
            Arc::new(FakeNode::new("s1", 1_000_000, 0).with(slow)),
            Arc::new(FakeNode::new("s2", 1_000_000, 0).with(slow)),
            Arc::new(FakeNode::new("s3", 1_000_000, 0).with(slow)),
            Arc::new(FakeNode::new("s4", 1_000_000, 0).with(slow)),
            Arc::new(FakeNode::new("ok", 10, 0)),
        ];
        let router = router(&nodes);

        let started = std::time::Instant::now();
        let status = router.status().await;
        assert_eq!(status.active_nodes, 1);
        // sequential probing would need four timeouts
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_no_reachable_nodes() {
        let nodes = vec![
            Arc::new(FakeNode::new("a", 1, 0).with(Behaviour::Down)),
            Arc::new(FakeNode::new("b", 1, 0).with(Behaviour::Down)),
        ];
        let router = router(&nodes);

        assert!(matches!(
            router.select().await,
            Err(Error::ServiceUnavailable(_))
        ));
        assert!(matches!(
            router.forward("f_chunk00000", vec![1]).await,
            Err(Error::ServiceUnavailable(_))
        ));

        let empty = ClusterRouter::new("http://empty", Vec::new(), config());
        assert!(matches!(
            empty.select().await,
            Err(Error::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_ties_spread_across_nodes() {
        let nodes = vec![
            Arc::new(FakeNode::new("a", 500, 1)),
            Arc::new(FakeNode::new("b", 500, 1)),
            Arc::new(FakeNode::new("c", 450, 0)),
            Arc::new(FakeNode::new("d", 100, 0)),
        ];
        let router = router(&nodes);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..600 {
            *counts.entry(router.select().await.unwrap().address).or_default() += 1;
        }
        assert!(!counts.contains_key("d"));
        for name in ["a", "b", "c"] {
            let n = counts[name];
            assert!((120..280).contains(&n), "{name} chosen {n} times");
        }
    }

    #[tokio::test]
    async fn test_forward_stores_on_selected_node() {
        let nodes = vec![
            Arc::new(FakeNode::new("n1", 10, 0)),
            Arc::new(FakeNode::new("n2", 5_000, 0)),
        ];
        let router = router(&nodes);

        let receipt = router.upload_chunk("f_chunk00000", vec![1, 2]).await.unwrap();
        assert_eq!(receipt.node, "n2");
        assert_eq!(receipt.status, "stored");
        assert_eq!(nodes[1].stored(), vec!["f_chunk00000".to_string()]);
        assert!(nodes[0].stored().is_empty());
    }

    #[tokio::test]
    async fn test_forward_store_failure_has_no_fallback() {
        let nodes = vec![
            Arc::new(FakeNode::new("best", 5_000, 0).with(Behaviour::RejectStore)),
            Arc::new(FakeNode::new("second", 4_000, 0)),
        ];
        let router = router(&nodes);

        let err = router.forward("f_chunk00000", vec![1]).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamFailure { ref target, .. } if target == "best"));
        assert!(nodes[1].stored().is_empty());
    }

    #[tokio::test]
    async fn test_forward_rejects_missing_input_before_probing() {
        let nodes = vec![Arc::new(FakeNode::new("n1", 10, 0))];
        let router = router(&nodes);

        assert!(matches!(
            router.forward("", vec![1]).await,
            Err(Error::MissingInput(_))
        ));
        assert!(matches!(
            router.forward("f_chunk00000", Vec::new()).await,
            Err(Error::MissingInput(_))
        ));
        assert_eq!(nodes[0].status_calls.load(Ordering::SeqCst), 0);
    }
}
