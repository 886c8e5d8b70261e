//! Mode state machine (C5): the single mutex-guarded source of truth for
//! which mode the proxy is in, the active record session, and every live
//! replay session's state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hyper::Uri;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::network::client::HttpClient;
use crate::recording::{
    headers_from_pairs, Direction, HeaderValue, Recording, RecordedRequest, RecordedResponse,
    RecordingSession, WebSocketRecording, WsMessage,
};
use crate::replay::{self, ReplayState};
use crate::{OuliError, Result};

/// Default auto-reset timeout for record/replay mode, in milliseconds.
pub const DEFAULT_MODE_TIMEOUT_MS: i64 = 120_000;

/// Which phase the proxy is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Requests pass straight through to a target with no capture.
    #[default]
    Transparent,
    /// Requests are forwarded and captured into the active session.
    Record,
    /// Requests are answered from a loaded recording session, never
    /// touching a real backend.
    Replay,
}

impl Mode {
    /// The lowercase string used on the wire (`transparent`/`record`/`replay`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Record => "record",
            Self::Replay => "replay",
        }
    }

    /// Parse the wire representation of a mode.
    ///
    /// # Errors
    ///
    /// Returns [`OuliError::UnknownMode`] for anything but
    /// `transparent`/`record`/`replay`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "transparent" => Ok(Self::Transparent),
            "record" => Ok(Self::Record),
            "replay" => Ok(Self::Replay),
            other => Err(OuliError::UnknownMode(other.to_string())),
        }
    }
}

/// A forwarding target parsed from a CLI argument.
#[derive(Debug, Clone)]
pub struct Target {
    /// `http` or `https`.
    pub scheme: String,
    /// Hostname or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Target {
    /// Parse a target URL such as `http://localhost:4000`.
    ///
    /// # Errors
    ///
    /// Returns [`OuliError::ConfigError`] if the value isn't a valid URL
    /// with a host.
    pub fn parse(raw: &str) -> Result<Self> {
        let uri: Uri = raw
            .parse()
            .map_err(|e| OuliError::ConfigError(format!("invalid target url '{raw}': {e}")))?;

        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        let host = uri
            .host()
            .ok_or_else(|| OuliError::ConfigError(format!("target url '{raw}' has no host")))?
            .to_string();
        let port = uri
            .port_u16()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });

        Ok(Self { scheme, host, port })
    }

    /// The WebSocket scheme (`ws`/`wss`) matching this target's HTTP scheme.
    #[must_use]
    pub fn ws_scheme(&self) -> &'static str {
        if self.scheme == "https" {
            "wss"
        } else {
            "ws"
        }
    }

    /// Whether this target expects TLS on the forward connection.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }
}

struct EngineState {
    mode: Mode,
    active_replay_id: Option<String>,
    record_session: Option<RecordingSession>,
    next_recording_id: u64,
    replay_sessions: HashMap<String, ReplayState>,
    mode_timer: Option<JoinHandle<()>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            active_replay_id: None,
            record_session: None,
            next_recording_id: 0,
            replay_sessions: HashMap::new(),
            mode_timer: None,
        }
    }
}

/// The mode state machine and everything it guards. Shared across every
/// connection handler as an `Arc<Engine>`.
pub struct Engine {
    recordings_dir: PathBuf,
    targets: Vec<Target>,
    next_target: AtomicUsize,
    http_client: HttpClient,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Build a fresh engine, starting in transparent mode.
    #[must_use]
    pub fn new(recordings_dir: PathBuf, targets: Vec<Target>) -> Arc<Self> {
        Arc::new(Self {
            recordings_dir,
            targets,
            next_target: AtomicUsize::new(0),
            http_client: HttpClient::new(),
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Directory recordings are loaded from and saved to.
    #[must_use]
    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// The shared forwarding HTTP client.
    #[must_use]
    pub fn http_client(&self) -> &HttpClient {
        &self.http_client
    }

    /// Pick the next upstream target, round-robin.
    #[must_use]
    pub fn next_target(&self) -> Target {
        let i = self.next_target.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        self.targets[i].clone()
    }

    /// The current mode.
    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// The current mode and, if set, the session id that mode applies to.
    pub async fn describe(&self) -> (Mode, Option<String>) {
        let state = self.state.lock().await;
        (state.mode, state.active_replay_id.clone())
    }

    /// Whether a live replay session exists for `id`, regardless of the
    /// engine's current mode (replay state outlives mode switches).
    pub async fn has_replay_session(&self, id: &str) -> bool {
        self.state.lock().await.replay_sessions.contains_key(id)
    }

    /// The session id bound to the current replay mode, if any.
    pub async fn active_replay_id(&self) -> Option<String> {
        self.state.lock().await.active_replay_id.clone()
    }

    /// Switch modes, persisting any in-flight record session first.
    ///
    /// # Errors
    ///
    /// Returns [`OuliError::MissingId`] if switching to record/replay
    /// without an id.
    pub async fn switch_mode(
        self: &Arc<Self>,
        mode: Mode,
        id: Option<String>,
        timeout_ms: i64,
    ) -> Result<()> {
        if matches!(mode, Mode::Record | Mode::Replay) && id.is_none() {
            return Err(OuliError::MissingId);
        }

        let mut state = self.state.lock().await;

        if let Some(handle) = state.mode_timer.take() {
            handle.abort();
        }

        persist_record_session(&mut state, &self.recordings_dir);

        match mode {
            Mode::Transparent => {
                state.mode = Mode::Transparent;
                state.active_replay_id = None;
            }
            Mode::Record => {
                let id = id.expect("checked above");
                state.record_session = Some(RecordingSession::new(id));
                state.next_recording_id = 0;
                state.mode = Mode::Record;
                state.active_replay_id = None;
            }
            Mode::Replay => {
                let id = id.expect("checked above");
                state
                    .replay_sessions
                    .entry(id.clone())
                    .or_default()
                    .reset_served();
                state.mode = Mode::Replay;
                state.active_replay_id = Some(id);
            }
        }

        if timeout_ms > 0 {
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms as u64)).await;
                if let Err(e) = engine.switch_mode(Mode::Transparent, None, 0).await {
                    warn!("mode-timer auto-reset failed: {e}");
                }
            });
            state.mode_timer = Some(handle);
        }

        Ok(())
    }

    /// Drop (persisting first if active) the record/replay state for `id`.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn cleanup(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.record_session.as_ref().map(|s| s.id.as_str()) == Some(id) {
            if let Some(mut session) = state.record_session.take() {
                crate::recording::save(&self.recordings_dir, &mut session)?;
            }
        }

        state.replay_sessions.remove(id);
        Ok(())
    }

    /// Synchronously allocate a `recording_id` and append a response-less
    /// shell recording, before any request-body I/O. Returns `None` if not
    /// currently recording.
    pub async fn begin_record(
        &self,
        method: &str,
        url: &str,
        headers: HashMap<String, HeaderValue>,
    ) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.record_session.is_none() {
            return None;
        }

        let recording_id = state.next_recording_id;
        state.next_recording_id += 1;
        let key = crate::fingerprint::key(method, url);

        let recording = Recording {
            request: RecordedRequest {
                method: method.to_string(),
                url: url.to_string(),
                headers,
                body: None,
            },
            response: None,
            timestamp: Utc::now(),
            key,
            recording_id,
            sequence: None,
        };

        state
            .record_session
            .as_mut()
            .expect("checked above")
            .recordings
            .push(recording);

        Some(recording_id)
    }

    /// Attach the buffered request body to a shell recording.
    pub async fn update_request_body(&self, recording_id: u64, body: String) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.record_session.as_mut() {
            if let Some(r) = session
                .recordings
                .iter_mut()
                .find(|r| r.recording_id == recording_id)
            {
                r.request.body = Some(body);
            }
        }
    }

    /// Attach the upstream response to a shell recording, completing it.
    pub async fn complete_record(&self, recording_id: u64, response: RecordedResponse) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.record_session.as_mut() {
            if let Some(r) = session
                .recordings
                .iter_mut()
                .find(|r| r.recording_id == recording_id)
            {
                r.timestamp = Utc::now();
                r.response = Some(response);
            }
        }
    }

    /// Append an intercepted WebSocket frame to the recording for `url`,
    /// creating it on first use.
    pub async fn append_ws_message(&self, url: &str, direction: Direction, data: String) {
        let mut state = self.state.lock().await;
        let Some(session) = state.record_session.as_mut() else {
            return;
        };

        if !session.websocket_recordings.iter().any(|w| w.url == url) {
            session.websocket_recordings.push(WebSocketRecording {
                url: url.to_string(),
                key: crate::fingerprint::ws_key(url),
                timestamp: Utc::now(),
                messages: Vec::new(),
            });
        }

        let entry = session
            .websocket_recordings
            .iter_mut()
            .find(|w| w.url == url)
            .expect("just inserted");

        entry.messages.push(WsMessage {
            direction,
            data,
            timestamp: Utc::now(),
        });
    }

    /// Resolve the recording that answers `method`/`url` for replay
    /// session `session_id`, lazily loading the session from disk.
    ///
    /// # Errors
    ///
    /// [`OuliError::FileNotFound`]/[`OuliError::ReplayCorruptFile`] if the
    /// recording file can't be loaded; [`OuliError::ReplayNoMatch`] if no
    /// candidate matches.
    pub async fn replay(&self, session_id: &str, method: &str, url: &str) -> Result<Recording> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, session_id)?;

        let replay_state = state
            .replay_sessions
            .get_mut(session_id)
            .expect("just ensured");
        let session = replay_state
            .loaded_session
            .as_ref()
            .expect("just ensured");

        let recording = replay::select(session, &mut replay_state.served_by_key, method, url)?;
        Ok(recording.clone())
    }

    /// Resolve the `WebSocketRecording` answering `url` for replay
    /// session `session_id`, lazily loading the session from disk.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Engine::replay`], plus
    /// [`OuliError::WsReplayMissing`].
    pub async fn load_ws_recording(&self, session_id: &str, url: &str) -> Result<WebSocketRecording> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, session_id)?;

        let replay_state = state
            .replay_sessions
            .get(session_id)
            .expect("just ensured");
        let session = replay_state
            .loaded_session
            .as_ref()
            .expect("just ensured");

        replay::select_ws(session, url).cloned()
    }

    fn ensure_loaded(&self, state: &mut EngineState, session_id: &str) -> Result<()> {
        let replay_state = state.replay_sessions.entry(session_id.to_string()).or_default();
        if replay_state.loaded_session.is_none() {
            let session = crate::recording::load(&self.recordings_dir, session_id)?;
            replay_state.loaded_session = Some(session);
        }
        Ok(())
    }
}

fn persist_record_session(state: &mut EngineState, dir: &Path) {
    if let Some(mut session) = state.record_session.take() {
        if let Err(e) = crate::recording::save(dir, &mut session) {
            error!("failed to persist recording session '{}': {e}", session.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn targets() -> Vec<Target> {
        vec![Target::parse("http://localhost:4000").unwrap()]
    }

    #[test]
    fn target_parses_scheme_host_port() {
        let t = Target::parse("https://api.example.test:8443").unwrap();
        assert_eq!(t.scheme, "https");
        assert_eq!(t.host, "api.example.test");
        assert_eq!(t.port, 8443);
        assert_eq!(t.ws_scheme(), "wss");
    }

    #[test]
    fn target_defaults_port_by_scheme() {
        let t = Target::parse("http://api.example.test").unwrap();
        assert_eq!(t.port, 80);
    }

    #[tokio::test]
    async fn starts_transparent() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path().to_path_buf(), targets());
        assert_eq!(engine.mode().await, Mode::Transparent);
    }

    #[tokio::test]
    async fn switch_to_record_requires_id() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path().to_path_buf(), targets());
        let err = engine.switch_mode(Mode::Record, None, 0).await.unwrap_err();
        assert!(matches!(err, OuliError::MissingId));
    }

    #[tokio::test]
    async fn round_robin_cycles_targets() {
        let dir = TempDir::new().unwrap();
        let targets = vec![
            Target::parse("http://a.test").unwrap(),
            Target::parse("http://b.test").unwrap(),
        ];
        let engine = Engine::new(dir.path().to_path_buf(), targets);
        let first = engine.next_target().host;
        let second = engine.next_target().host;
        let third = engine.next_target().host;
        assert_eq!(first, "a.test");
        assert_eq!(second, "b.test");
        assert_eq!(third, "a.test");
    }

    #[tokio::test]
    async fn record_then_replay_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path().to_path_buf(), targets());

        engine
            .switch_mode(Mode::Record, Some("s1".to_string()), 0)
            .await
            .unwrap();

        let rid = engine
            .begin_record("GET", "/api/posts", HashMap::new())
            .await
            .unwrap();
        engine.update_request_body(rid, String::new()).await;
        engine
            .complete_record(
                rid,
                RecordedResponse {
                    status_code: 200,
                    headers: HashMap::new(),
                    body: Some("hello".to_string()),
                },
            )
            .await;

        engine
            .switch_mode(Mode::Replay, Some("s1".to_string()), 0)
            .await
            .unwrap();

        let recording = engine.replay("s1", "GET", "/api/posts").await.unwrap();
        assert_eq!(recording.response.unwrap().body.unwrap(), "hello");
    }

    #[tokio::test]
    async fn cleanup_removes_replay_session() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(dir.path().to_path_buf(), targets());
        engine
            .switch_mode(Mode::Record, Some("s1".to_string()), 0)
            .await
            .unwrap();
        let rid = engine
            .begin_record("GET", "/x", HashMap::new())
            .await
            .unwrap();
        engine
            .complete_record(
                rid,
                RecordedResponse {
                    status_code: 200,
                    headers: HashMap::new(),
                    body: None,
                },
            )
            .await;
        engine
            .switch_mode(Mode::Replay, Some("s1".to_string()), 0)
            .await
            .unwrap();
        assert!(engine.has_replay_session("s1").await);
        engine.cleanup("s1").await.unwrap();
        assert!(!engine.has_replay_session("s1").await);
    }
}
