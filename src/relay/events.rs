//! Synthetic SSE frames written by the relay itself.
//!
//! Upstream data never passes through here; it is forwarded untouched.
//! These are the only frames the relay originates.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

const CONNECTED: &str = "event: connected\ndata: {\"status\":\"connected\"}\n\n";
const CLOSED_BY_SERVER: &str = "event: closed\ndata: {\"status\":\"closed_by_server\"}\n\n";

/// Emitted once, right after the client response switches to streaming.
pub fn connected() -> Bytes {
    Bytes::from_static(CONNECTED.as_bytes())
}

/// Terminal frame for a clean upstream end-of-stream.
pub fn closed_by_server() -> Bytes {
    Bytes::from_static(CLOSED_BY_SERVER.as_bytes())
}

/// Heartbeat frame stamped with `now` (e.g. `2026-10-18T09:30:00.000Z`).
pub fn ping(now: DateTime<Utc>) -> Bytes {
    let data = json!({ "time": now.to_rfc3339_opts(SecondsFormat::Millis, true) });
    frame("ping", &data.to_string())
}

/// Terminal frame for an upstream stream failure.
pub fn error(message: &str) -> Bytes {
    let data = json!({ "error": message });
    frame("error", &data.to_string())
}

fn frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}
