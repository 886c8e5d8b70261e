//! Request fingerprinting (C1): deterministic `RecordingKey` derivation.
//!
//! Two requests fingerprint to the same key iff method, path, and query
//! string are byte-equal. Headers are deliberately excluded — header-based
//! disambiguation is out of scope (see spec's Non-goals).

/// Compute the `RecordingKey` for a request.
///
/// `url` is the request's path plus optional `?query`. The key is built as
/// `METHOD_PATHSEGMENTS[_HEX16].json`: path segments joined by `_` (the
/// empty path becomes `root`), with an optional `_` + first 16 hex chars of
/// the MD5 digest of the raw query string when a query is present. The
/// result is filename-sanitised.
#[must_use]
pub fn key(method: &str, url: &str) -> String {
    let (path, query) = split_url(url);
    let path_part = path_key(path);

    let mut raw = format!("{}_{path_part}", method.to_uppercase());

    if let Some(query) = query {
        let digest = md5::compute(query.as_bytes());
        let hex = format!("{digest:x}");
        raw.push('_');
        raw.push_str(&hex[..16]);
    }

    raw.push_str(".json");
    sanitize_filename(&raw)
}

/// Compute the `RecordingKey` for a WebSocket recording: `"WS_" + sanitize(url)`.
#[must_use]
pub fn ws_key(url: &str) -> String {
    format!("WS_{}", sanitize_filename(url))
}

/// Split a request target into `(path, query)`. `query` is `None` only when
/// there is no `?` at all; an empty query string after `?` is `Some("")`.
fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}

/// Join non-empty path segments with `_`; the empty path is `root`.
fn path_key(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "root".to_string()
    } else {
        segments.join("_")
    }
}

/// Replace filesystem-unsafe characters with `_`.
///
/// Keeps alphanumerics, `.`, `_`, and `-`; everything else (path
/// separators, control characters, reserved Windows/shell characters)
/// collapses to `_`.
#[must_use]
pub fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(
            key("GET", "/api/posts"),
            key("GET", "/api/posts"),
            "fingerprint must be deterministic"
        );
    }

    #[test]
    fn different_methods_differ() {
        assert_ne!(key("GET", "/api/posts"), key("POST", "/api/posts"));
    }

    #[test]
    fn different_paths_differ() {
        assert_ne!(key("GET", "/api/v1"), key("GET", "/api/v2"));
    }

    #[test]
    fn root_path_is_root() {
        assert_eq!(key("GET", "/"), "GET_root.json");
        assert_eq!(key("GET", ""), "GET_root.json");
    }

    #[test]
    fn segments_joined_by_underscore() {
        assert_eq!(key("GET", "/api/posts"), "GET_api_posts.json");
    }

    #[test]
    fn query_adds_hash_suffix() {
        let with_query = key("GET", "/search?q=a");
        let without_query = key("GET", "/search");
        assert_ne!(with_query, without_query);
        assert!(with_query.starts_with("GET_search_"));
        // "GET_search_" + 16 hex chars + ".json"
        assert_eq!(with_query.len(), "GET_search_".len() + 16 + ".json".len());
    }

    #[test]
    fn distinct_queries_distinct_keys() {
        // S3: /search?q=a and /search?q=b must not collide
        assert_ne!(key("GET", "/search?q=a"), key("GET", "/search?q=b"));
    }

    #[test]
    fn same_query_same_key() {
        assert_eq!(
            key("GET", "/search?q=a&b=2"),
            key("GET", "/search?q=a&b=2")
        );
    }

    #[test]
    fn method_is_case_normalized() {
        assert_eq!(key("get", "/x"), key("GET", "/x"));
    }

    #[test]
    fn sanitizes_unsafe_characters() {
        let k = key("GET", "/a:b<c>d");
        assert!(!k.contains(':'));
        assert!(!k.contains('<'));
        assert!(!k.contains('>'));
    }

    #[test]
    fn ws_key_prefix() {
        assert_eq!(ws_key("/ws"), "WS__ws");
    }

    proptest::proptest! {
        #[test]
        fn prop_deterministic(method in "[A-Z]{3,6}", path in "/[a-z/]{0,20}") {
            proptest::prop_assert_eq!(key(&method, &path), key(&method, &path));
        }
    }
}
