//! Error types for Ouli

use std::io;
use thiserror::Error;

/// Result type for Ouli operations
pub type Result<T> = std::result::Result<T, OuliError>;

/// Errors that can occur in Ouli
#[derive(Debug, Error)]
pub enum OuliError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Recording file could not be parsed as JSON
    #[error("Invalid recording format: {0}")]
    InvalidFormat(String),

    /// Recording file not found on disk
    #[error("Recording file not found: {0}")]
    FileNotFound(String),

    /// Recording file exists but failed to parse
    #[error("Recording corrupted: {0}")]
    ReplayCorruptFile(String),

    /// Configuration error (CLI args, limits, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Control channel payload was malformed or missing required fields
    #[error("Bad control payload: {0}")]
    BadControlPayload(String),

    /// `mode=record` or `mode=replay` was requested without an `id`
    #[error("Missing required session id for this mode")]
    MissingId,

    /// Control channel requested a mode that isn't transparent/record/replay
    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    /// Upstream TCP connect failed
    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnectFail(String),

    /// Upstream connection accepted but I/O failed mid-exchange
    #[error("Upstream I/O error: {0}")]
    UpstreamIoFail(String),

    /// No replay session is bound to this request (no header, cookie, or active replayId)
    #[error("No replay session active")]
    ReplaySessionMissing,

    /// No recording matches this request's key in the loaded session
    #[error("No recording found")]
    ReplayNoMatch {
        /// The computed RecordingKey that had no candidates
        key: String,
        /// The replay session id being served
        session_id: String,
    },

    /// Upstream WebSocket connect/relay failed in record or transparent mode
    #[error("WebSocket upstream failure: {0}")]
    WsUpstreamFail(String),

    /// No WebSocketRecording matches this url in the loaded replay session
    #[error("No WebSocket recording found for this URL")]
    WsReplayMissing,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
