//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay sessions and HTTP plumbing produce:
//!     → logging.rs (structured tracing events, session_id / conversation_id fields)
//!     → metrics.rs (session gauges, byte and heartbeat counters)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Credentials and org ids are never recorded, only conversation ids
//! - Request ID (`x-request-id`) is attached by the HTTP layer's trace span
//! - Metrics are cheap (atomic increments) and off by default

pub mod logging;
pub mod metrics;
