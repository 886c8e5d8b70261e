//! HTTP forwarder (C6) and replay dispatch entry point (C7).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{info, warn};

use crate::engine::{Engine, Mode};
use crate::network::client::ForwardRequest;
use crate::recording::{headers_from_pairs, headers_to_pairs, RecordedResponse};
use crate::OuliError;

use super::{
    error_response, header_or_cookie_id, header_pairs, header_str, insert_header, json_response,
    proxy_error_response,
};
use crate::control;
use crate::recording::Recording;

/// Request bodies are buffered for at most this long before the proxy
/// gives up and proceeds with whatever arrived.
const BODY_BUFFER_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry point called by the connection service for every non-upgrade
/// request.
pub async fn handle(
    engine: Arc<Engine>,
    req: Request<Incoming>,
    _peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let origin = header_str(req.headers(), "origin");

    if req.method() == Method::OPTIONS {
        return preflight_response(&req, origin.as_deref());
    }

    if req.uri().path() == "/__control" {
        return handle_control(&engine, req, origin.as_deref()).await;
    }

    let mode = engine.mode().await;
    let replay_target = resolve_replay_target(&req, &engine, mode).await;

    match replay_target {
        Some(session_id) => handle_replay(&engine, req, &session_id, origin.as_deref()).await,
        None if mode == Mode::Replay => {
            error_response(StatusCode::BAD_REQUEST, &OuliError::ReplaySessionMissing.to_string(), origin.as_deref())
        }
        None => handle_forward(&engine, req, mode, origin.as_deref()).await,
    }
}

/// Decide whether this request should be served from a replay session,
/// and which one. A sticky id naming a still-live replay session wins
/// even outside replay mode (spec §4.5's concurrency rule); otherwise
/// replay only applies while the engine itself is in replay mode.
async fn resolve_replay_target(
    req: &Request<Incoming>,
    engine: &Arc<Engine>,
    mode: Mode,
) -> Option<String> {
    let sticky = header_or_cookie_id(req);

    if let Some(id) = &sticky {
        if engine.has_replay_session(id).await {
            return Some(id.clone());
        }
    }

    if mode == Mode::Replay {
        return match sticky {
            Some(id) => Some(id),
            None => engine.active_replay_id().await,
        };
    }

    None
}

async fn handle_replay(
    engine: &Arc<Engine>,
    req: Request<Incoming>,
    session_id: &str,
    origin: Option<&str>,
) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    match engine.replay(session_id, &method, &url).await {
        Ok(recording) => build_recorded_response(&recording, origin),
        Err(OuliError::FileNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Recording file not found", origin)
        }
        Err(OuliError::ReplayCorruptFile(msg)) => {
            error_response(StatusCode::NOT_FOUND, &msg, origin)
        }
        Err(OuliError::ReplayNoMatch { key, session_id }) => error_response(
            StatusCode::NOT_FOUND,
            &format!("No recording found for key '{key}' in session '{session_id}'"),
            origin,
        ),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, &e.to_string(), origin),
    }
}

async fn handle_forward(
    engine: &Arc<Engine>,
    req: Request<Incoming>,
    mode: Mode,
    origin: Option<&str>,
) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let headers = header_pairs(req.headers());

    let recording_id = if mode == Mode::Record {
        engine
            .begin_record(&method, &path_and_query, headers_from_pairs(headers.clone()))
            .await
    } else {
        None
    };

    let body = read_body_with_timeout(req.into_body()).await;

    if let Some(rid) = recording_id {
        engine
            .update_request_body(rid, String::from_utf8_lossy(&body).into_owned())
            .await;
    }

    let target = engine.next_target();
    info!("forwarding {method} {path_and_query} to {}:{}", target.host, target.port);

    let forward_req = ForwardRequest {
        method: &method,
        scheme: &target.scheme,
        target_host: &target.host,
        target_port: target.port,
        path_and_query: &path_and_query,
        headers: &headers,
        body: &body,
    };

    match engine.http_client().forward_request(&forward_req).await {
        Ok(forwarded) => {
            if let Some(rid) = recording_id {
                let recorded = RecordedResponse {
                    status_code: forwarded.status,
                    headers: headers_from_pairs(forwarded.headers.clone()),
                    body: Some(String::from_utf8_lossy(&forwarded.body).into_owned()),
                };
                engine.complete_record(rid, recorded).await;
            }

            let mut builder = Response::builder().status(
                StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY),
            );
            if let Some(headers) = builder.headers_mut() {
                for (name, value) in &forwarded.headers {
                    insert_header(headers, name, value);
                }
            }

            let mut response = builder
                .body(Full::new(Bytes::from(forwarded.body)))
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
            crate::cors::apply(response.headers_mut(), origin, None);
            response
        }
        Err(e) => {
            warn!("upstream connect failed: {e}");
            proxy_error_response(&e.to_string(), origin)
        }
    }
}

async fn read_body_with_timeout(body: Incoming) -> Vec<u8> {
    match tokio::time::timeout(BODY_BUFFER_TIMEOUT, body.collect()).await {
        Ok(Ok(collected)) => collected.to_bytes().to_vec(),
        Ok(Err(e)) => {
            warn!("failed to read request body: {e}");
            Vec::new()
        }
        Err(_) => {
            warn!("request body buffering timed out after {BODY_BUFFER_TIMEOUT:?}; proceeding with what was read");
            Vec::new()
        }
    }
}

fn build_recorded_response(recording: &Recording, origin: Option<&str>) -> Response<Full<Bytes>> {
    let Some(response) = &recording.response else {
        return error_response(StatusCode::NOT_FOUND, "Recording has no response", origin);
    };

    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK),
    );
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in headers_to_pairs(&response.headers) {
            insert_header(headers, &name, &value);
        }
    }

    let body = response.body.clone().unwrap_or_default().into_bytes();
    let mut resp = builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    crate::cors::apply(resp.headers_mut(), origin, None);
    resp
}

fn preflight_response(req: &Request<Incoming>, origin: Option<&str>) -> Response<Full<Bytes>> {
    let requested_headers = header_str(req.headers(), "access-control-request-headers");

    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));

    crate::cors::apply(resp.headers_mut(), origin, requested_headers.as_deref());
    insert_header(
        resp.headers_mut(),
        "access-control-max-age",
        crate::cors::PREFLIGHT_MAX_AGE,
    );
    resp
}

async fn handle_control(
    engine: &Arc<Engine>,
    req: Request<Incoming>,
    origin: Option<&str>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);

    let outcome = if method == Method::GET {
        control::handle_get(engine, query.as_deref()).await
    } else if method == Method::POST {
        let body = read_body_with_timeout(req.into_body()).await;
        control::handle_post(engine, &body).await
    } else {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Unsupported method for /__control",
            origin,
        );
    };

    match outcome {
        Ok(control::ControlOutcome::Describe(body)) => {
            json_response(StatusCode::OK, &body, origin, None, None)
        }
        Ok(control::ControlOutcome::Switched { body, set_cookie }) => {
            json_response(StatusCode::OK, &body, origin, None, set_cookie.as_deref())
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string(), origin),
    }
}
