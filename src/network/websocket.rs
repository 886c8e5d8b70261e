//! Low-level WebSocket plumbing: connecting to upstream targets and
//! translating between `tokio-tungstenite` frames and recorded text.

use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{OuliError, Result};

/// Wrap a hyper-upgraded connection as a server-role WebSocket stream.
pub async fn server_stream(upgraded: Upgraded) -> WebSocketStream<TokioIo<Upgraded>> {
    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await
}

/// Connect to an upstream WebSocket endpoint.
///
/// # Errors
///
/// Returns [`OuliError::WsUpstreamFail`] if the handshake fails.
pub async fn connect_to_endpoint(
    url: &str,
) -> Result<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>> {
    tokio_tungstenite::connect_async(url)
        .await
        .map(|(stream, _)| stream)
        .map_err(|e| OuliError::WsUpstreamFail(e.to_string()))
}

/// Whether a frame carries application data worth recording.
#[must_use]
pub fn is_data_message(msg: &Message) -> bool {
    matches!(msg, Message::Text(_) | Message::Binary(_))
}

/// Render a frame as text for storage (lossy for binary frames).
#[must_use]
pub fn message_to_text(msg: &Message) -> String {
    match msg {
        Message::Text(text) => text.to_string(),
        Message::Binary(data) => String::from_utf8_lossy(data).into_owned(),
        _ => String::new(),
    }
}

/// Build a text frame from recorded data.
#[must_use]
pub fn text_message(data: String) -> Message {
    Message::Text(data.into())
}

/// Whether an incoming HTTP request asks to upgrade to a WebSocket.
#[must_use]
pub fn is_upgrade_request<B>(req: &hyper::Request<B>) -> bool {
    let has_upgrade_header = req
        .headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let has_connection_upgrade = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));

    has_upgrade_header && has_connection_upgrade
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_binary_are_data_messages() {
        assert!(is_data_message(&text_message("hi".to_string())));
        assert!(is_data_message(&Message::Binary(vec![1, 2, 3].into())));
    }

    #[test]
    fn ping_is_not_a_data_message() {
        assert!(!is_data_message(&Message::Ping(Vec::new().into())));
    }

    #[test]
    fn binary_renders_lossy_text() {
        let msg = Message::Binary(b"hello".to_vec().into());
        assert_eq!(message_to_text(&msg), "hello");
    }

    #[test]
    fn text_round_trips() {
        let msg = text_message("hello".to_string());
        assert_eq!(message_to_text(&msg), "hello");
    }

    #[test]
    fn detects_upgrade_request() {
        let req = hyper::Request::builder()
            .header(hyper::header::UPGRADE, "websocket")
            .header(hyper::header::CONNECTION, "Upgrade")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&req));
    }

    #[test]
    fn plain_request_is_not_upgrade() {
        let req = hyper::Request::builder().body(()).unwrap();
        assert!(!is_upgrade_request(&req));
    }
}
