//! HTTP clients for nodes, cluster routers and the global router
//!
//! Each client carries the per-call timeout in its `reqwest::Client`. Error
//! responses are mapped back onto [`Error`] so a node's 404 surfaces as
//! `NotFound` two hops away, and transport failures surface as `Unreachable`.

use crate::error::INVALID_ARGUMENT;
use crate::routing::{ClusterApi, ClusterReceipt, ClusterStatus, PlacementApi, PlacementReceipt};
use crate::storage::{NodeApi, NodeReceipt, NodeStatus};
use crate::transport::Connector;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Build a client whose every request gives up after `timeout`
pub fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::InvalidArgument(format!("cannot build http client: {e}")))
}

/// `address` with `segments` appended as percent-encoded path segments
fn endpoint(address: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(address)
        .map_err(|e| Error::InvalidArgument(format!("bad address {address:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidArgument(format!("address {address:?} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    details: String,
}

/// Map a non-success response onto the error kind it reports
async fn error_from(target: &str, subject: &str, response: Response) -> Error {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    let invalid = body.error == INVALID_ARGUMENT;
    let reason = if body.details.is_empty() {
        body.error
    } else {
        body.details
    };

    match status {
        StatusCode::BAD_REQUEST if invalid => Error::InvalidArgument(reason),
        StatusCode::BAD_REQUEST => Error::MissingInput(reason),
        StatusCode::NOT_FOUND => Error::NotFound(subject.to_string()),
        StatusCode::SERVICE_UNAVAILABLE => Error::ServiceUnavailable(reason),
        _ => Error::upstream(target, format!("{status}: {reason}")),
    }
}

async fn send(target: &str, request: reqwest::RequestBuilder) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| Error::unreachable(target, e))
}

async fn json_or_error<T: DeserializeOwned>(
    target: &str,
    subject: &str,
    response: Response,
) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from(target, subject, response).await);
    }
    response
        .json()
        .await
        .map_err(|e| Error::upstream(target, format!("malformed response: {e}")))
}

/// A storage node reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpNode {
    address: String,
    client: Client,
}

impl HttpNode {
    pub fn new(address: impl Into<String>, client: Client) -> Self {
        Self {
            address: address.into(),
            client,
        }
    }
}

#[async_trait]
impl NodeApi for HttpNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn store(&self, chunk_id: &str, data: Vec<u8>) -> Result<()> {
        let url = endpoint(&self.address, &["store"])?;
        let request = self
            .client
            .post(url)
            .query(&[("chunk_id", chunk_id)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = send(&self.address, request).await?;
        let _: NodeReceipt = json_or_error(&self.address, chunk_id, response).await?;
        Ok(())
    }

    async fn fetch(&self, chunk_id: &str) -> Result<Vec<u8>> {
        let url = endpoint(&self.address, &["chunk", chunk_id])?;
        let response = send(&self.address, self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(error_from(&self.address, chunk_id, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::unreachable(&self.address, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, chunk_id: &str) -> Result<()> {
        let url = endpoint(&self.address, &["chunk", chunk_id])?;
        let response = send(&self.address, self.client.delete(url)).await?;
        let _: NodeReceipt = json_or_error(&self.address, chunk_id, response).await?;
        Ok(())
    }

    async fn status(&self) -> Result<NodeStatus> {
        let url = endpoint(&self.address, &["status"])?;
        let response = send(&self.address, self.client.get(url)).await?;
        json_or_error(&self.address, "node status", response).await
    }
}

/// A cluster router reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpCluster {
    address: String,
    client: Client,
}

impl HttpCluster {
    pub fn new(address: impl Into<String>, client: Client) -> Self {
        Self {
            address: address.into(),
            client,
        }
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    fn address(&self) -> &str {
        &self.address
    }

    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<ClusterReceipt> {
        let url = endpoint(&self.address, &["upload_chunk"])?;
        let request = self
            .client
            .post(url)
            .query(&[("chunk_id", chunk_id)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = send(&self.address, request).await?;
        json_or_error(&self.address, chunk_id, response).await
    }

    async fn status(&self) -> Result<ClusterStatus> {
        let url = endpoint(&self.address, &["status"])?;
        let response = send(&self.address, self.client.get(url)).await?;
        json_or_error(&self.address, "cluster status", response).await
    }
}

/// The global router reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpGlobal {
    address: String,
    client: Client,
}

impl HttpGlobal {
    pub fn new(address: impl Into<String>, client: Client) -> Self {
        Self {
            address: address.into(),
            client,
        }
    }
}

#[async_trait]
impl PlacementApi for HttpGlobal {
    async fn upload_chunk(&self, chunk_id: &str, data: Vec<u8>) -> Result<PlacementReceipt> {
        let url = endpoint(&self.address, &["upload_chunk"])?;
        let request = self
            .client
            .post(url)
            .query(&[("chunk_id", chunk_id)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        let response = send(&self.address, request).await?;
        json_or_error(&self.address, chunk_id, response).await
    }
}

/// Opens [`HttpNode`]s sharing one client
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Connector for HttpConnector {
    fn node(&self, address: &str) -> Result<Arc<dyn NodeApi>> {
        Ok(Arc::new(HttpNode::new(address, self.client.clone())))
    }
}
