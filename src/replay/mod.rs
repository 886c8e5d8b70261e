//! Replay dispatch (C7): purely ordinal recording selection.
//!
//! No heuristics, no fuzzy matching — a request's `RecordingKey` selects a
//! candidate group, and arrival order within that group picks which
//! candidate answers the *k*-th request for it.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::fingerprint;
use crate::recording::{Recording, RecordingSession, WebSocketRecording};
use crate::{OuliError, Result};

/// Per-session replay state: the lazily-loaded recording set, and which
/// `recording_id`s have already answered each key.
#[derive(Debug, Default)]
pub struct ReplayState {
    /// The session loaded from disk on first use, cached thereafter.
    pub loaded_session: Option<RecordingSession>,
    /// Ids already served, per key, within the current replay "epoch".
    pub served_by_key: HashMap<String, HashSet<u64>>,
}

impl ReplayState {
    /// Clear served-ids tracking without dropping the cached session.
    pub fn reset_served(&mut self) {
        self.served_by_key.clear();
    }
}

/// Select the recording that answers `method`/`url` against `session`,
/// advancing `served_by_key`.
///
/// The *k*-th request for a given key returns candidate
/// `min(k, n - 1)`: once every candidate has been served once, the last
/// one repeats (with a warning logged for the non-determinism).
///
/// # Errors
///
/// Returns [`OuliError::ReplayNoMatch`] if no recording in the session has
/// a matching key and a response.
pub fn select<'a>(
    session: &'a RecordingSession,
    served_by_key: &mut HashMap<String, HashSet<u64>>,
    method: &str,
    url: &str,
) -> Result<&'a Recording> {
    let key = fingerprint::key(method, url);

    let mut candidates: Vec<&Recording> = session
        .recordings
        .iter()
        .filter(|r| r.key == key && r.response.is_some())
        .collect();
    candidates.sort_by_key(|r| r.sequence.unwrap_or(r.recording_id));

    if candidates.is_empty() {
        warn!(
            "no recording observed for key '{key}' in session '{}' — the test may have issued a \
             new request or its name changed since recording",
            session.id
        );
        return Err(OuliError::ReplayNoMatch {
            key,
            session_id: session.id.clone(),
        });
    }

    let served = served_by_key.entry(key.clone()).or_default();
    let pick = candidates
        .iter()
        .find(|r| !served.contains(&r.recording_id))
        .copied()
        .unwrap_or_else(|| {
            warn!(
                "replay exhausted {} candidate(s) for key '{key}' in session '{}'; repeating last",
                candidates.len(),
                session.id
            );
            *candidates.last().unwrap()
        });

    served.insert(pick.recording_id);
    Ok(pick)
}

/// Select the `WebSocketRecording` matching `url` in a replay session.
///
/// # Errors
///
/// Returns [`OuliError::WsReplayMissing`] if no recording matches.
pub fn select_ws<'a>(session: &'a RecordingSession, url: &str) -> Result<&'a WebSocketRecording> {
    let key = fingerprint::ws_key(url);
    session
        .websocket_recordings
        .iter()
        .find(|w| w.key == key)
        .ok_or(OuliError::WsReplayMissing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{headers_from_pairs, RecordedRequest, RecordedResponse};
    use chrono::Utc;

    fn recording(id: u64, seq: u64, key: &str) -> Recording {
        Recording {
            request: RecordedRequest {
                method: "GET".to_string(),
                url: "/x".to_string(),
                headers: headers_from_pairs(Vec::new()),
                body: None,
            },
            response: Some(RecordedResponse {
                status_code: 200,
                headers: headers_from_pairs(Vec::new()),
                body: Some(format!("body-{id}")),
            }),
            timestamp: Utc::now(),
            key: key.to_string(),
            recording_id: id,
            sequence: Some(seq),
        }
    }

    #[test]
    fn order_preserved_across_repeated_calls() {
        let mut session = RecordingSession::new("s1");
        session.recordings.push(recording(0, 0, "GET_x.json"));
        session.recordings.push(recording(1, 1, "GET_x.json"));

        let mut served = HashMap::new();
        let first = select(&session, &mut served, "GET", "/x").unwrap();
        assert_eq!(first.recording_id, 0);
        let second = select(&session, &mut served, "GET", "/x").unwrap();
        assert_eq!(second.recording_id, 1);
    }

    #[test]
    fn exhaustion_repeats_last_candidate() {
        let mut session = RecordingSession::new("s1");
        session.recordings.push(recording(0, 0, "GET_x.json"));
        session.recordings.push(recording(1, 1, "GET_x.json"));

        let mut served = HashMap::new();
        select(&session, &mut served, "GET", "/x").unwrap();
        select(&session, &mut served, "GET", "/x").unwrap();
        let third = select(&session, &mut served, "GET", "/x").unwrap();
        assert_eq!(third.recording_id, 1);
    }

    #[test]
    fn no_match_reports_key_and_session() {
        let session = RecordingSession::new("s1");
        let mut served = HashMap::new();
        let err = select(&session, &mut served, "GET", "/missing").unwrap_err();
        match err {
            OuliError::ReplayNoMatch { key, session_id } => {
                assert_eq!(session_id, "s1");
                assert!(key.starts_with("GET_missing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn distinct_keys_have_independent_cursors() {
        let mut session = RecordingSession::new("s1");
        session.recordings.push(recording(0, 0, "GET_a.json"));
        session.recordings.push(recording(1, 0, "GET_b.json"));

        let mut served = HashMap::new();
        let a = select(&session, &mut served, "GET", "/a").unwrap();
        let b = select(&session, &mut served, "GET", "/b").unwrap();
        assert_eq!(a.recording_id, 0);
        assert_eq!(b.recording_id, 1);
    }
}
