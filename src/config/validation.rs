//! Configuration validation.
//!
//! Serde handles syntax; this pass checks values that deserialize fine but
//! would break the relay at runtime. All errors are returned, not just the first.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RelayConfig;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("stream.keepalive_interval_secs must be greater than 0")]
    ZeroKeepAlive,

    #[error("stream.channel_capacity must be greater than 0")]
    ZeroChannelCapacity,

    #[error("upstream.scheme must be \"http\" or \"https\", got {0:?}")]
    UnsupportedScheme(String),

    #[error("upstream.path must start with '/', got {0:?}")]
    RelativePath(String),

    #[error("observability.metrics_address is not a socket address: {0:?}")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.stream.keepalive_interval_secs == 0 {
        errors.push(ValidationError::ZeroKeepAlive);
    }
    if config.stream.channel_capacity == 0 {
        errors.push(ValidationError::ZeroChannelCapacity);
    }
    if !matches!(config.upstream.scheme.as_str(), "http" | "https") {
        errors.push(ValidationError::UnsupportedScheme(config.upstream.scheme.clone()));
    }
    if !config.upstream.path.starts_with('/') {
        errors.push(ValidationError::RelativePath(config.upstream.path.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
