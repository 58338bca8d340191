//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, request ID, CORS)
//! - Bind server to listener
//! - Stop accepting and let sessions drain on shutdown

use std::sync::Arc;

use axum::{
    http::{header::InvalidHeaderValue, StatusCode},
    middleware,
    routing::get,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{RelayConfig, StreamConfig};
use crate::http::middleware::cors::{cors_middleware, CorsHeaders};
use crate::http::request::{make_request_span, propagate_request_id_layer, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::relay::{relay_handler, UpstreamClient};

/// Body of the health check response.
pub const HEALTH_BODY: &str = "SSE relay is running";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub stream: StreamConfig,
    pub shutdown: Shutdown,
}

/// Error type for server construction and serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid CORS header value: {0}")]
    InvalidCorsHeader(#[from] InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the SSE relay.
pub struct RelayServer {
    router: Router,
    shutdown: broadcast::Receiver<()>,
}

impl RelayServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// `shutdown` stops the listener and every session opened through it.
    pub fn new(config: RelayConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let cors = Arc::new(CorsHeaders::from_config(&config.cors)?);
        let state = AppState {
            upstream: UpstreamClient::new(&config.upstream),
            stream: config.stream.clone(),
            shutdown: shutdown.clone(),
        };

        let router = Self::build_router(state, cors);
        Ok(Self {
            router,
            shutdown: shutdown.subscribe(),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState, cors: Arc<CorsHeaders>) -> Router {
        Router::new()
            .route("/", get(health_handler))
            .route("/sse-proxy", get(relay_handler))
            .fallback(not_found_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                    .layer(propagate_request_id_layer())
                    .layer(middleware::from_fn_with_state(cors, cors_middleware)),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "SSE relay listening"
        );

        let mut shutdown = self.shutdown;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> &'static str {
    HEALTH_BODY
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
