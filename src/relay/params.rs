//! Relay request parameters.

use serde::Deserialize;

use crate::relay::error::RelayError;

/// Resume cursor meaning "from the start of the conversation".
pub const DEFAULT_LAST_EVENT_ID: &str = "0";

/// Raw query string of `GET /sse-proxy`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayQuery {
    pub scrt_url: Option<String>,
    pub conversation_id: Option<String>,
    pub last_event_id: Option<String>,
    pub org_id: Option<String>,
    pub access_token: Option<String>,
}

/// Validated parameters for one relay session.
#[derive(Clone)]
pub struct RelayParams {
    /// Bare upstream host fragment, no scheme.
    pub host: String,
    /// Lower-cased conversation id.
    pub conversation_id: String,
    pub last_event_id: String,
    pub org_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for RelayParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayParams")
            .field("host", &self.host)
            .field("conversation_id", &self.conversation_id)
            .field("last_event_id", &self.last_event_id)
            .field("org_id", &"<redacted>")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl RelayQuery {
    /// Check required fields and normalize the rest.
    ///
    /// Empty values count as missing. Missing fields are reported in a fixed
    /// order so the client message is stable.
    pub fn validate(self) -> Result<RelayParams, RelayError> {
        let host = present(self.scrt_url);
        let conversation_id = present(self.conversation_id);
        let org_id = present(self.org_id);
        let access_token = present(self.access_token);

        let mut missing = Vec::new();
        if host.is_none() {
            missing.push("scrtUrl");
        }
        if conversation_id.is_none() {
            missing.push("conversationId");
        }
        if org_id.is_none() {
            missing.push("orgId");
        }
        if access_token.is_none() {
            missing.push("accessToken");
        }

        match (host, conversation_id, org_id, access_token) {
            (Some(host), Some(conversation_id), Some(org_id), Some(access_token)) => Ok(RelayParams {
                host,
                conversation_id: conversation_id.to_lowercase(),
                last_event_id: present(self.last_event_id)
                    .unwrap_or_else(|| DEFAULT_LAST_EVENT_ID.to_string()),
                org_id,
                access_token,
            }),
            _ => Err(RelayError::MissingParameter(missing)),
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
