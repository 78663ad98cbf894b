//! HTTP surface of the fleet's services
//!
//! Each tier gets its own router: a storage node, a cluster router and the
//! global router. Chunk payloads travel as raw request bodies; control fields
//! travel as the `chunk_id` query parameter.

pub mod cluster;
pub mod global;
pub mod node;

pub use cluster::cluster_router;
pub use global::global_router;
pub use node::node_router;

use crate::{Error, Result};
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::signal;

/// Largest request body a service accepts
pub const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct ChunkParams {
    pub chunk_id: Option<String>,
}

impl ChunkParams {
    pub(crate) fn require(self) -> Result<String> {
        self.chunk_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::MissingInput("chunk_id".into()))
    }
}

/// Serve `app` on `listener` until Ctrl-C or SIGTERM
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
