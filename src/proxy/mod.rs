//! Request orchestration: HTTP forwarding/replay (C6/C7) and the
//! WebSocket bridge (C8), plus response-building helpers shared by both.

pub mod http;
pub mod websocket;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use hyper::{HeaderMap, Request, Response, StatusCode};
use serde::Serialize;

use crate::cors;

/// Read a header as a `String`, if present and valid UTF-8.
pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Flatten a request's headers into an ordered list of pairs.
pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// Resolve the sticky session id for a request: the
/// `x-test-rcrd-id` header, falling back to the `proxy-recording-id`
/// cookie.
pub(crate) fn header_or_cookie_id<B>(req: &Request<B>) -> Option<String> {
    if let Some(v) = req
        .headers()
        .get("x-test-rcrd-id")
        .and_then(|v| v.to_str().ok())
    {
        return Some(v.to_string());
    }

    let cookie_header = req.headers().get(COOKIE)?.to_str().ok()?;
    cookie_header.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("proxy-recording-id=")
            .map(str::to_string)
    })
}

/// Build a JSON response with the CORS overlay applied.
pub(crate) fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
    origin: Option<&str>,
    requested_headers: Option<&str>,
    set_cookie: Option<&str>,
) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());

    let mut builder = Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json");

    if let Some(cookie) = set_cookie {
        builder = builder.header(SET_COOKIE, cookie);
    }

    let mut response = builder
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));

    cors::apply(response.headers_mut(), origin, requested_headers);
    response
}

/// Build a `{"error": message}` response with the CORS overlay applied.
pub(crate) fn error_response(
    status: StatusCode,
    message: &str,
    origin: Option<&str>,
) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({ "error": message }),
        origin,
        None,
        None,
    )
}

/// Build the `{"error": "Proxy error", "message": ...}` body spec §4.9
/// mandates for upstream connection failures.
pub(crate) fn proxy_error_response(message: &str, origin: Option<&str>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::BAD_GATEWAY,
        &serde_json::json!({ "error": "Proxy error", "message": message }),
        origin,
        None,
        None,
    )
}

/// Insert a header into a response, silently skipping values hyper
/// refuses to encode (e.g. stray control characters from an upstream).
pub(crate) fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
