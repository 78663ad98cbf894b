//! HTTP routes of a cluster router

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::api::{ChunkParams, MAX_BODY_BYTES};
use crate::routing::{ClusterApi, ClusterReceipt, ClusterRouter, ClusterStatus};
use crate::{Error, Result};

pub fn cluster_router(router: Arc<ClusterRouter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload_chunk", post(upload_chunk))
        .route("/status", get(cluster_status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn index() -> &'static str {
    "Cluster manager is running"
}

/// POST /upload_chunk?chunk_id=<id>
async fn upload_chunk(
    State(router): State<Arc<ClusterRouter>>,
    Query(params): Query<ChunkParams>,
    body: Bytes,
) -> Result<Json<ClusterReceipt>> {
    let chunk_id = params.require()?;
    if body.is_empty() {
        return Err(Error::MissingInput("chunk".into()));
    }
    Ok(Json(ClusterApi::upload_chunk(router.as_ref(), &chunk_id, body.to_vec()).await?))
}

/// GET /status
async fn cluster_status(State(router): State<Arc<ClusterRouter>>) -> Json<ClusterStatus> {
    Json(router.status().await)
}
