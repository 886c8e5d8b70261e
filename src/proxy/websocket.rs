//! WebSocket bridge (C8): upgrade handling plus the record and replay
//! message loops.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::{Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::engine::{Engine, Mode};
use crate::network::websocket::{
    connect_to_endpoint, is_data_message, message_to_text, server_stream, text_message,
};
use crate::recording::{Direction, WebSocketRecording};

use super::{error_response, header_or_cookie_id, header_str};

/// Delay between each staggered leading server→client replay message.
const LEAD_MESSAGE_STAGGER_MS: u64 = 10;

/// Handle a request that asked to upgrade to a WebSocket connection.
///
/// In replay mode (for the resolved sticky session) this serves frames
/// from a recorded `WebSocketRecording` without ever touching a real
/// backend. Otherwise it connects upstream and, while recording,
/// mirrors every frame into the active session.
pub async fn handle_upgrade(engine: Arc<Engine>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let origin = header_str(req.headers(), "origin");

    let Some(key) = header_str(req.headers(), SEC_WEBSOCKET_KEY.as_str()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing Sec-WebSocket-Key",
            origin.as_deref(),
        );
    };

    let url = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mode = engine.mode().await;
    let sticky = header_or_cookie_id(&req);
    let replay_session_id = resolve_replay_session(&engine, mode, sticky.as_deref()).await;

    if let Some(session_id) = replay_session_id {
        return handle_replay_upgrade(engine, req, session_id, &url, &key, origin).await;
    }

    if mode == Mode::Replay {
        return error_response(
            StatusCode::BAD_REQUEST,
            &crate::OuliError::ReplaySessionMissing.to_string(),
            origin.as_deref(),
        );
    }

    handle_forward_upgrade(engine, req, mode, &url, &key, origin).await
}

async fn resolve_replay_session(engine: &Arc<Engine>, mode: Mode, sticky: Option<&str>) -> Option<String> {
    if let Some(id) = sticky {
        if engine.has_replay_session(id).await {
            return Some(id.to_string());
        }
    }

    if mode == Mode::Replay {
        return match sticky {
            Some(id) => Some(id.to_string()),
            None => engine.active_replay_id().await,
        };
    }

    None
}

async fn handle_replay_upgrade(
    engine: Arc<Engine>,
    mut req: Request<Incoming>,
    session_id: String,
    url: &str,
    key: &str,
    origin: Option<String>,
) -> Response<Full<Bytes>> {
    let recording = match engine.load_ws_recording(&session_id, url).await {
        Ok(r) => r,
        Err(e) => {
            warn!("websocket replay miss for '{url}' in session '{session_id}': {e}");
            return error_response(StatusCode::NOT_FOUND, &e.to_string(), origin.as_deref());
        }
    };

    let response = switching_protocols_response(key);

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let stream = server_stream(upgraded).await;
                replay_ws(stream, recording).await;
            }
            Err(e) => warn!("websocket upgrade failed: {e}"),
        }
    });

    response
}

async fn handle_forward_upgrade(
    engine: Arc<Engine>,
    mut req: Request<Incoming>,
    mode: Mode,
    url: &str,
    key: &str,
    origin: Option<String>,
) -> Response<Full<Bytes>> {
    let target = engine.next_target();
    let upstream_url = format!("{}://{}:{}{}", target.ws_scheme(), target.host, target.port, url);

    let server = match connect_to_endpoint(&upstream_url).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("websocket upstream connect failed: {e}");
            return error_response(StatusCode::BAD_GATEWAY, &e.to_string(), origin.as_deref());
        }
    };

    let response = switching_protocols_response(key);
    let should_record = mode == Mode::Record;
    let url = url.to_string();

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let client = server_stream(upgraded).await;
                bridge(engine, client, server, should_record, url).await;
            }
            Err(e) => warn!("websocket upgrade failed: {e}"),
        }
    });

    response
}

fn switching_protocols_response(key: &str) -> Response<Full<Bytes>> {
    let accept = derive_accept_key(key.as_bytes());

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Bidirectional relay between a client and an upstream WebSocket,
/// recording every data frame in both directions when `should_record`.
async fn bridge<C, S>(
    engine: Arc<Engine>,
    mut client: WebSocketStream<C>,
    mut server: WebSocketStream<S>,
    should_record: bool,
    url: String,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            msg = client.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => { warn!("client websocket error: {e}"); break; }
                };

                if msg.is_close() {
                    let _ = server.send(msg).await;
                    break;
                }

                if should_record && is_data_message(&msg) {
                    engine
                        .append_ws_message(&url, Direction::ClientToServer, message_to_text(&msg))
                        .await;
                }

                if let Err(e) = server.send(msg).await {
                    warn!("failed to forward to upstream websocket: {e}");
                    break;
                }
            }
            msg = server.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => { warn!("upstream websocket error: {e}"); break; }
                };

                if msg.is_close() {
                    let _ = client.send(msg).await;
                    break;
                }

                if should_record && is_data_message(&msg) {
                    engine
                        .append_ws_message(&url, Direction::ServerToClient, message_to_text(&msg))
                        .await;
                }

                if let Err(e) = client.send(msg).await {
                    warn!("failed to forward to client websocket: {e}");
                    break;
                }
            }
            else => break,
        }
    }
}

/// Serve a WebSocket connection entirely from a recording: any leading
/// server→client messages are emitted first (staggered), then each
/// client message advances to the next unused server→client message.
async fn replay_ws<C>(mut client: WebSocketStream<C>, recording: WebSocketRecording)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut server_messages = recording.messages.iter().filter(|m| m.direction == Direction::ServerToClient);
    let leading: Vec<_> = recording
        .messages
        .iter()
        .take_while(|m| m.direction == Direction::ServerToClient)
        .collect();

    for (i, msg) in leading.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(LEAD_MESSAGE_STAGGER_MS * i as u64)).await;
        }
        if client.send(text_message(msg.data.clone())).await.is_err() {
            return;
        }
    }

    let mut remaining = server_messages.by_ref().skip(leading.len());

    loop {
        match client.next().await {
            Some(Ok(msg)) => {
                if msg.is_close() {
                    break;
                }
                if !is_data_message(&msg) {
                    continue;
                }
                debug!("replay websocket received client message, advancing cursor");

                if let Some(next) = remaining.next() {
                    tokio::time::sleep(Duration::from_millis(LEAD_MESSAGE_STAGGER_MS)).await;
                    if client.send(text_message(next.data.clone())).await.is_err() {
                        break;
                    }
                } else {
                    warn!("websocket replay exhausted for '{}'", recording.url);
                }
            }
            Some(Err(e)) => {
                warn!("replay websocket client error: {e}");
                break;
            }
            None => break,
        }
    }
}
