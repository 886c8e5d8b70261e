//! CORS overlay (C3): headers added on top of every response so the
//! proxy is usable directly from a browser test harness.

use hyper::header::{HeaderName, HeaderValue as HyperHeaderValue};
use hyper::HeaderMap;

/// Methods the proxy always advertises as allowed.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";

/// Headers advertised when the preflight request didn't ask for specific
/// ones via `Access-Control-Request-Headers`.
pub const DEFAULT_ALLOWED_HEADERS: &str =
    "Origin, X-Requested-With, Content-Type, Accept, Authorization, x-test-rcrd-id";

/// Preflight cache lifetime, in seconds.
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// Compute the overlay headers for a response.
///
/// `origin` echoes the request's `Origin` header, falling back to `*`.
/// `requested_headers` echoes `Access-Control-Request-Headers` on a
/// preflight, falling back to [`DEFAULT_ALLOWED_HEADERS`].
#[must_use]
pub fn overlay(origin: Option<&str>, requested_headers: Option<&str>) -> Vec<(&'static str, String)> {
    vec![
        (
            "access-control-allow-origin",
            origin.unwrap_or("*").to_string(),
        ),
        ("access-control-allow-credentials", "true".to_string()),
        (
            "access-control-allow-headers",
            requested_headers.unwrap_or(DEFAULT_ALLOWED_HEADERS).to_string(),
        ),
        ("access-control-allow-methods", ALLOWED_METHODS.to_string()),
        ("access-control-expose-headers", "*".to_string()),
    ]
}

/// Apply the CORS overlay to `headers` in place, replacing any backend
/// value for the same header names.
pub fn apply(headers: &mut HeaderMap, origin: Option<&str>, requested_headers: Option<&str>) {
    for (name, value) in overlay(origin, requested_headers) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HyperHeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_echoed() {
        let headers = overlay(Some("https://example.test"), None);
        let (_, origin) = headers
            .iter()
            .find(|(name, _)| *name == "access-control-allow-origin")
            .unwrap();
        assert_eq!(origin, "https://example.test");
    }

    #[test]
    fn missing_origin_falls_back_to_wildcard() {
        let headers = overlay(None, None);
        let (_, origin) = headers
            .iter()
            .find(|(name, _)| *name == "access-control-allow-origin")
            .unwrap();
        assert_eq!(origin, "*");
    }

    #[test]
    fn requested_headers_are_echoed() {
        let headers = overlay(None, Some("X-Custom"));
        let (_, allow_headers) = headers
            .iter()
            .find(|(name, _)| *name == "access-control-allow-headers")
            .unwrap();
        assert_eq!(allow_headers, "X-Custom");
    }

    #[test]
    fn apply_overrides_existing_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "access-control-allow-origin",
            HyperHeaderValue::from_static("https://stale.test"),
        );
        apply(&mut headers, Some("https://example.test"), None);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "https://example.test"
        );
    }

    #[test]
    fn credentials_always_true() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, None, None);
        assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
    }
}
