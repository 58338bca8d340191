//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup)
//!     → request.rs (request ID, per-request span)
//!     → middleware/cors.rs (CORS headers, OPTIONS short-circuit)
//!     → GET /          health check
//!     → GET /sse-proxy relay::relay_handler
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, RelayServer, ServerError};
