//! SSE relay subsystem.
//!
//! # Data Flow
//! ```text
//! GET /sse-proxy?scrtUrl=..&conversationId=..&orgId=..&accessToken=..
//!     → params.rs (validate, lower-case conversation id, default cursor)
//!     → upstream.rs (GET upstream with bearer + X-Org-Id)
//!         ├─ non-2xx / transport error → error.rs → plain HTTP error response
//!         └─ 2xx
//!             → session.rs (Connecting → Streaming, `connected` frame)
//!             → spawned session task ──frames──▶ mpsc channel ──▶ response body
//! ```
//!
//! # Design Decisions
//! - One task per session owns the upstream stream, the heartbeat and the
//!   channel sender; nothing is shared across sessions
//! - Client disconnect is observed as the response body (channel receiver)
//!   being dropped
//! - Upstream bytes are forwarded as received, never re-framed

pub mod error;
pub mod events;
pub mod params;
pub mod session;
pub mod upstream;

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderName},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::http::server::AppState;
use crate::observability::metrics;

pub use error::RelayError;
pub use params::{RelayParams, RelayQuery};
pub use session::{RelaySession, SessionState, Termination};
pub use upstream::UpstreamClient;

/// Upstream response body as consumed by a session.
pub type UpstreamBody = BoxStream<'static, reqwest::Result<Bytes>>;

/// Tells nginx-style proxies not to buffer the stream.
pub const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `GET /sse-proxy` handler.
///
/// A parameter given twice (`orgId=a&orgId=b`) fails in the `Query`
/// extractor itself, so the client gets axum's plain 400 naming the
/// duplicate field rather than the missing-parameter message.
pub async fn relay_handler(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, RelayError> {
    let params = query.validate().inspect_err(|e| {
        tracing::warn!(error = %e, "Rejecting relay request");
    })?;

    tracing::info!(
        conversation_id = %params.conversation_id,
        last_event_id = %params.last_event_id,
        "Starting SSE connection"
    );

    let upstream = state.upstream.connect(&params).await.inspect_err(|e| {
        if let RelayError::UpstreamRejected { status, .. } = e {
            metrics::record_upstream_rejection(status.as_u16());
        }
        tracing::error!(
            conversation_id = %params.conversation_id,
            status = %e.status(),
            error = %e,
            "Upstream SSE connection failed"
        );
    })?;

    let (tx, rx) = mpsc::channel(state.stream.channel_capacity);
    let keepalive = Duration::from_secs(state.stream.keepalive_interval_secs);

    let body: UpstreamBody = upstream.bytes_stream().boxed();
    let mut session = RelaySession::new(params.conversation_id);
    // The receiver is still held here, so `connected` always fits in the
    // fresh channel and start cannot observe a departed client.
    session.start(body, tx, keepalive).await;

    tokio::spawn(session.run(state.shutdown.subscribe()));

    Ok(sse_response(rx))
}

/// Streaming response whose body is fed by a session's client channel.
fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
