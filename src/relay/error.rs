//! Failures that happen before the client response is committed.
//!
//! Anything after that point can only be reported in-band, see
//! [`Termination`](crate::relay::session::Termination).

use std::error::Error as StdError;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced through the normal HTTP status/body channel.
#[derive(Debug, Error)]
pub enum RelayError {
    /// One or more required query parameters were absent or empty.
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameter(Vec<&'static str>),

    /// The upstream URL could not be built from the supplied host fragment.
    #[error("SSE proxy error: invalid upstream URL: {0}")]
    InvalidUpstream(String),

    /// Network, DNS or TLS failure before any upstream response.
    #[error("SSE proxy error: {cause}")]
    UpstreamUnreachable { cause: String },

    /// Upstream answered with a non-success status. `body` is kept as sent.
    #[error("Upstream SSE server error: {} - {}", .status.as_u16(), String::from_utf8_lossy(.body))]
    UpstreamRejected { status: StatusCode, body: Bytes },
}

/// Render an error with every `source()` below it, joined by `": "`.
///
/// Transport errors keep the useful part (refused, reset, premature EOF)
/// several levels down; the top-level message alone rarely says why.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

impl RelayError {
    /// Status code reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            RelayError::InvalidUpstream(_) | RelayError::UpstreamUnreachable { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::UpstreamRejected { status, .. } => *status,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            RelayError::UpstreamRejected { body, .. } => {
                let mut raw = format!("Upstream SSE server error: {} - ", status.as_u16()).into_bytes();
                raw.extend_from_slice(&body);
                (status, Body::from(raw)).into_response()
            }
            other => (status, other.to_string()).into_response(),
        }
    }
}
