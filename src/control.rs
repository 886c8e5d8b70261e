//! Control channel (C4): the `/__control` endpoint used to switch modes,
//! clean up sessions, and read current state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, Mode};
use crate::{OuliError, Result};

/// The HTTP-only cookie the proxy sets to bind a client to a replay
/// session after a mode switch.
pub const COOKIE_NAME: &str = "proxy-recording-id";

/// Default auto-reset timeout when a POST payload doesn't specify one.
pub const DEFAULT_TIMEOUT_MS: i64 = crate::engine::DEFAULT_MODE_TIMEOUT_MS;

/// The POST body / GET query-param shape for `/__control`.
#[derive(Debug, Default, Deserialize)]
pub struct ControlPayload {
    /// `transparent`, `record`, or `replay`.
    pub mode: Option<String>,
    /// Session id, required for record/replay.
    pub id: Option<String>,
    /// Auto-reset timeout in ms; `<= 0` disables it.
    pub timeout: Option<i64>,
    /// If `true` (with `id`), drop that session's state instead of
    /// switching modes.
    pub cleanup: Option<bool>,
}

/// Response body for a successful mode switch or cleanup.
#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    /// Always `true` on success.
    pub success: bool,
    /// The mode now in effect.
    pub mode: String,
    /// The session id the request named, if any.
    pub id: Option<String>,
    /// The effective auto-reset timeout in ms.
    pub timeout: i64,
    #[serde(rename = "recordingsDir")]
    /// The directory recordings are read from and written to.
    pub recordings_dir: String,
}

/// Response body for a state-read (`GET /__control` with no query).
#[derive(Debug, Serialize)]
pub struct DescribeResponse {
    #[serde(rename = "recordingsDir")]
    /// The directory recordings are read from and written to.
    pub recordings_dir: String,
    /// The current mode.
    pub mode: String,
    /// The session id the current mode applies to, if any.
    pub id: Option<String>,
}

/// What a control request resolved to.
#[derive(Debug)]
pub enum ControlOutcome {
    /// A state read with no side effects.
    Describe(DescribeResponse),
    /// A mode switch or cleanup, possibly setting a cookie.
    Switched {
        /// The response body.
        body: SwitchResponse,
        /// `Set-Cookie` value to attach, if the new mode is replay.
        set_cookie: Option<String>,
    },
}

/// Handle `GET /__control`. An empty query reads current state; a
/// populated one (`mode=...&id=...`) behaves like a POST.
///
/// # Errors
///
/// Propagates [`OuliError::BadControlPayload`]/[`OuliError::MissingId`]/
/// [`OuliError::UnknownMode`] from the underlying switch.
pub async fn handle_get(engine: &Arc<Engine>, query: Option<&str>) -> Result<ControlOutcome> {
    match query.filter(|q| !q.is_empty()) {
        None => {
            let (mode, id) = engine.describe().await;
            Ok(ControlOutcome::Describe(DescribeResponse {
                recordings_dir: engine.recordings_dir().display().to_string(),
                mode: mode.as_str().to_string(),
                id,
            }))
        }
        Some(q) => {
            let payload = parse_query(q);
            apply(engine, payload).await
        }
    }
}

/// Handle `POST /__control` with a JSON body.
///
/// # Errors
///
/// Returns [`OuliError::BadControlPayload`] if the body isn't valid JSON,
/// plus the failure modes of [`handle_get`]'s populated-query branch.
pub async fn handle_post(engine: &Arc<Engine>, body: &[u8]) -> Result<ControlOutcome> {
    let payload: ControlPayload =
        serde_json::from_slice(body).map_err(|e| OuliError::BadControlPayload(e.to_string()))?;
    apply(engine, payload).await
}

async fn apply(engine: &Arc<Engine>, payload: ControlPayload) -> Result<ControlOutcome> {
    if payload.cleanup == Some(true) {
        let id = payload
            .id
            .ok_or_else(|| OuliError::BadControlPayload("cleanup requires 'id'".to_string()))?;
        engine.cleanup(&id).await?;
        let (mode, _) = engine.describe().await;
        return Ok(ControlOutcome::Switched {
            body: SwitchResponse {
                success: true,
                mode: mode.as_str().to_string(),
                id: Some(id),
                timeout: 0,
                recordings_dir: engine.recordings_dir().display().to_string(),
            },
            set_cookie: None,
        });
    }

    let mode_str = payload
        .mode
        .ok_or_else(|| OuliError::BadControlPayload("'mode' is required".to_string()))?;
    let mode = Mode::parse(&mode_str)?;
    let timeout = payload.timeout.unwrap_or(DEFAULT_TIMEOUT_MS);

    engine.switch_mode(mode, payload.id.clone(), timeout).await?;

    let set_cookie = if mode == Mode::Replay {
        payload
            .id
            .as_ref()
            .map(|id| format!("{COOKIE_NAME}={id}; HttpOnly; Path=/; SameSite=Lax"))
    } else {
        None
    };

    Ok(ControlOutcome::Switched {
        body: SwitchResponse {
            success: true,
            mode: mode.as_str().to_string(),
            id: payload.id,
            timeout,
            recordings_dir: engine.recordings_dir().display().to_string(),
        },
        set_cookie,
    })
}

/// Parse a `mode=record&id=s1&timeout=5000`-style query string.
fn parse_query(query: &str) -> ControlPayload {
    let mut payload = ControlPayload::default();

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let raw_value = parts.next().unwrap_or("");
        let value = urlencoding::decode(raw_value)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw_value.to_string());

        match key {
            "mode" => payload.mode = Some(value),
            "id" => payload.id = Some(value),
            "timeout" => payload.timeout = value.parse::<i64>().ok(),
            "cleanup" => payload.cleanup = Some(value == "true" || value == "1"),
            _ => {}
        }
    }

    payload
}
