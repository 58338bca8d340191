//! SSE relay library.
//!
//! Relays a server-sent-event stream from an upstream event router to a
//! browser client, injecting the bearer token and org id headers the browser
//! cannot set itself and answering CORS pre-flights on its behalf.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod relay;

pub use config::schema::RelayConfig;
pub use http::RelayServer;
pub use lifecycle::Shutdown;
