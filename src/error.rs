//! Error kinds shared by every tier of the fleet
//!
//! The same enum is returned by in-process calls, mapped onto HTTP status
//! codes by the service routers and mapped back by the HTTP clients, so a
//! failure keeps its kind as it crosses a hop.

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::placement::ChunkPlacement;

/// `error` field of a 400 body raised by [`Error::InvalidArgument`]
pub(crate) const INVALID_ARGUMENT: &str = "invalid argument";

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A probe or call did not complete within the timeout, or the transport failed.
    #[error("{target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Every candidate at a selection step was unreachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A selected node or cluster accepted routing but failed the actual call.
    #[error("upstream {target} failed: {reason}")]
    UpstreamFailure { target: String, reason: String },

    #[error("{} of {attempted} chunk deletions failed for {file}", failed.len())]
    PartialFailure {
        file: String,
        attempted: usize,
        failed: Vec<String>,
    },

    /// Upload stopped at `chunk_id`; `orphans` were already stored and are not rolled back.
    #[error("upload of {file} aborted at {chunk_id}: {source}")]
    UploadAborted {
        file: String,
        chunk_id: String,
        orphans: Vec<ChunkPlacement>,
        source: Box<Error>,
    },

    #[error("digest mismatch for {file}: expected {expected}, got {actual}")]
    DigestMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn unreachable(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unreachable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn upstream(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::UpstreamFailure {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// HTTP status this error is reported with by the service routers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::MissingInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) | Self::Unreachable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::UpstreamFailure { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected: {}", self);
        }

        let summary = match &self {
            Self::InvalidArgument(_) => INVALID_ARGUMENT,
            Self::MissingInput(_) => "missing chunk or chunk_id",
            Self::NotFound(_) => "not found",
            Self::ServiceUnavailable(_) | Self::Unreachable { .. } => "no available targets",
            Self::UpstreamFailure { .. } => "upstream failure",
            _ => "an internal server error occurred",
        };

        (
            status_code,
            Json(json!({ "error": summary, "details": self.to_string() })),
        )
            .into_response()
    }
}
