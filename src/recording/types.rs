//! Wire-format data model for recording sessions (spec §3/§6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A header value as it appears in a recorded exchange: either a single
/// value or, when a header was repeated, all of its values in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// A header that appeared exactly once.
    Single(String),
    /// A header that appeared more than once.
    Multi(Vec<String>),
}

impl HeaderValue {
    /// All values this header carried, in order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(v) => vec![v.as_str()],
            Self::Multi(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Build a name→value(s) header map from an ordered list of pairs,
/// preserving repeated header names as a `HeaderValue::Multi`.
#[must_use]
pub fn headers_from_pairs<I>(pairs: I) -> HashMap<String, HeaderValue>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in pairs {
        grouped.entry(name).or_default().push(value);
    }

    grouped
        .into_iter()
        .map(|(name, mut values)| {
            if values.len() == 1 {
                (name, HeaderValue::Single(values.pop().unwrap()))
            } else {
                (name, HeaderValue::Multi(values))
            }
        })
        .collect()
}

/// Flatten a header map back into an ordered list of (name, value) pairs,
/// one entry per value.
#[must_use]
pub fn headers_to_pairs(headers: &HashMap<String, HeaderValue>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in headers {
        for v in value.values() {
            pairs.push((name.clone(), v.to_string()));
        }
    }
    pairs
}

/// A recorded HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// HTTP method, upper-case.
    pub method: String,
    /// Path plus optional `?query`.
    pub url: String,
    /// Request headers, by name.
    pub headers: HashMap<String, HeaderValue>,
    /// Request body, or `None` if not yet captured.
    pub body: Option<String>,
}

/// A recorded HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// HTTP status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Response headers, by name.
    pub headers: HashMap<String, HeaderValue>,
    /// Response body.
    pub body: Option<String>,
}

/// One recorded HTTP exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// The request as it arrived.
    pub request: RecordedRequest,
    /// The response, absent if the exchange never completed.
    pub response: Option<RecordedResponse>,
    /// When the response arrived (or the shell was created, if absent).
    pub timestamp: DateTime<Utc>,
    /// The `RecordingKey` this exchange groups under.
    pub key: String,
    /// Arrival-order id, unique and increasing within the session.
    #[serde(rename = "recordingId")]
    pub recording_id: u64,
    /// Rank within its key group, assigned at persistence time.
    pub sequence: Option<u64>,
}

/// Direction a WebSocket message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Client to server.
    #[serde(rename = "client-to-server")]
    ClientToServer,
    /// Server to client.
    #[serde(rename = "server-to-client")]
    ServerToClient,
}

/// A single intercepted WebSocket frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Which way the frame travelled.
    pub direction: Direction,
    /// Frame payload, as text.
    pub data: String,
    /// When the frame was intercepted.
    pub timestamp: DateTime<Utc>,
}

/// All frames recorded for one WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketRecording {
    /// The upgrade request's path plus query.
    pub url: String,
    /// `"WS_" + sanitize(url)`.
    pub key: String,
    /// When the upgrade was first observed.
    pub timestamp: DateTime<Utc>,
    /// Frames in wall-clock order of interception.
    pub messages: Vec<WsMessage>,
}

/// A full recording session: every HTTP exchange and WebSocket upgrade
/// captured under one session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSession {
    /// The session id this file was recorded under.
    pub id: String,
    /// Captured HTTP exchanges.
    pub recordings: Vec<Recording>,
    /// Captured WebSocket upgrades.
    #[serde(rename = "websocketRecordings")]
    pub websocket_recordings: Vec<WebSocketRecording>,
}

impl RecordingSession {
    /// A fresh, empty session for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            recordings: Vec::new(),
            websocket_recordings: Vec::new(),
        }
    }
}
