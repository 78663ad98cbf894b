//! Resolving recorded node addresses to callable nodes
//!
//! Placement records store plain addresses. Downloads and deletes turn each
//! address back into a [`NodeApi`] through a [`Connector`], over HTTP in a
//! deployed fleet or through a [`LocalFleet`] when every node lives in this
//! process.

pub mod http;

pub use http::{HttpCluster, HttpConnector, HttpGlobal, HttpNode};

use crate::storage::NodeApi;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub trait Connector: Send + Sync {
    fn node(&self, address: &str) -> Result<Arc<dyn NodeApi>>;
}

/// In-process directory of nodes keyed by address
#[derive(Default, Clone)]
pub struct LocalFleet {
    nodes: HashMap<String, Arc<dyn NodeApi>>,
}

impl LocalFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Arc<dyn NodeApi>) {
        self.nodes.insert(node.address().to_string(), node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<Arc<dyn NodeApi>> for LocalFleet {
    fn from_iter<T: IntoIterator<Item = Arc<dyn NodeApi>>>(iter: T) -> Self {
        let mut fleet = Self::new();
        for node in iter {
            fleet.add(node);
        }
        fleet
    }
}

impl Connector for LocalFleet {
    fn node(&self, address: &str) -> Result<Arc<dyn NodeApi>> {
        self.nodes
            .get(address)
            .cloned()
            .ok_or_else(|| Error::unreachable(address, "unknown node address"))
    }
}
