//! Recording data model and persistence (C2).

mod store;
mod types;

pub use store::{load, load_path, save, session_file_name};
pub use types::{
    headers_from_pairs, headers_to_pairs, Direction, HeaderValue, Recording, RecordedRequest,
    RecordedResponse, RecordingSession, WebSocketRecording, WsMessage,
};
