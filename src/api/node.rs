//! HTTP routes of a storage node

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::api::{ChunkParams, MAX_BODY_BYTES};
use crate::storage::{NodeApi, NodeReceipt, NodeStatus, StorageNode};
use crate::{Error, Result};

pub fn node_router(node: Arc<StorageNode>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/store", post(store_chunk))
        .route("/status", get(node_status))
        .route("/chunk/{chunk_id}", get(get_chunk).delete(delete_chunk))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn index() -> &'static str {
    "Storage node is running"
}

/// POST /store?chunk_id=<id>
async fn store_chunk(
    State(node): State<Arc<StorageNode>>,
    Query(params): Query<ChunkParams>,
    body: Bytes,
) -> Result<Json<NodeReceipt>> {
    let chunk_id = params.require()?;
    if body.is_empty() {
        return Err(Error::MissingInput("chunk".into()));
    }

    node.store(&chunk_id, body.to_vec()).await?;
    Ok(Json(NodeReceipt {
        status: "stored".into(),
        chunk_id,
    }))
}

/// GET /status
async fn node_status(State(node): State<Arc<StorageNode>>) -> Result<Json<NodeStatus>> {
    Ok(Json(node.status().await?))
}

/// GET /chunk/<id>
async fn get_chunk(
    State(node): State<Arc<StorageNode>>,
    Path(chunk_id): Path<String>,
) -> Result<impl IntoResponse> {
    let data = node.fetch(&chunk_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

/// DELETE /chunk/<id>
async fn delete_chunk(
    State(node): State<Arc<StorageNode>>,
    Path(chunk_id): Path<String>,
) -> Result<Json<NodeReceipt>> {
    node.delete(&chunk_id).await?;
    Ok(Json(NodeReceipt {
        status: "deleted".into(),
        chunk_id,
    }))
}
