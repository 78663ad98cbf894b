//! HTTP routes of the global router

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::api::{ChunkParams, MAX_BODY_BYTES};
use crate::routing::{FleetStatus, GlobalRouter, PlacementReceipt};
use crate::{Error, Result};

pub fn global_router(router: Arc<GlobalRouter>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload_chunk", post(upload_chunk))
        .route("/status", get(fleet_status))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn index() -> &'static str {
    "Global load balancer is running"
}

/// POST /upload_chunk?chunk_id=<id>
async fn upload_chunk(
    State(router): State<Arc<GlobalRouter>>,
    Query(params): Query<ChunkParams>,
    body: Bytes,
) -> Result<Json<PlacementReceipt>> {
    let chunk_id = params.require()?;
    if body.is_empty() {
        return Err(Error::MissingInput("chunk".into()));
    }
    Ok(Json(router.forward(&chunk_id, body.to_vec()).await?))
}

/// GET /status
async fn fleet_status(State(router): State<Arc<GlobalRouter>>) -> Json<FleetStatus> {
    Json(router.status().await)
}
