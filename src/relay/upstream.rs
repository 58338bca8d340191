//! Upstream connection establishment.
//!
//! # Responsibilities
//! - Build the upstream SSE endpoint from the caller-supplied host fragment
//! - Inject the headers the browser cannot set (bearer token, org id)
//! - Classify failures before any byte reaches the client
//!
//! # Design Decisions
//! - One shared `reqwest::Client`; each session still gets its own response stream
//! - No connect or request timeout: a quiet upstream is normal for SSE
//! - No retries; the caller owns retry policy

use axum::http::header;
use reqwest::Response;
use url::Url;

use crate::config::UpstreamConfig;
use crate::relay::error::{error_chain, RelayError};
use crate::relay::params::RelayParams;

/// Header carrying the tenant id upstream.
pub const X_ORG_ID: &str = "x-org-id";

/// Client for the upstream event router.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    scheme: String,
    path: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            scheme: config.scheme.clone(),
            path: config.path.clone(),
        }
    }

    /// Upstream SSE URL for the given session parameters.
    pub fn endpoint(&self, params: &RelayParams) -> Result<Url, RelayError> {
        let base = format!("{}://{}{}", self.scheme, params.host, self.path);
        let mut url = Url::parse(&base).map_err(|e| RelayError::InvalidUpstream(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("conversationId", &params.conversation_id)
            .append_pair("lastEventId", &params.last_event_id);
        Ok(url)
    }

    /// Open the upstream stream.
    ///
    /// On success the returned response has a 2xx status and an unread body.
    /// A non-success response is drained here so its body can be surfaced
    /// to the client.
    pub async fn connect(&self, params: &RelayParams) -> Result<Response, RelayError> {
        let url = self.endpoint(params)?;

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .bearer_auth(&params.access_token)
            .header(X_ORG_ID, &params.org_id)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnreachable {
                cause: error_chain(&e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_else(|e| {
                tracing::warn!(
                    status = %status,
                    error = %error_chain(&e),
                    "Failed to read upstream rejection body"
                );
                Default::default()
            });
            return Err(RelayError::UpstreamRejected { status, body });
        }

        Ok(response)
    }
}
