//! HTTP client for forwarding requests to upstream targets.

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::{OuliError, Result};

/// HTTP client used to forward proxied requests to a target.
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpClient {
    /// Create a new forwarding client with a shared connection pool.
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self { client }
    }

    /// Forward a request to its target, returning the buffered response.
    ///
    /// # Errors
    ///
    /// Returns [`OuliError::UpstreamConnectFail`] if the connection
    /// couldn't be established, or [`OuliError::UpstreamIoFail`] if the
    /// exchange failed mid-flight.
    pub async fn forward_request(&self, request: &ForwardRequest<'_>) -> Result<ForwardedResponse> {
        let uri = build_uri(
            request.scheme,
            request.target_host,
            request.target_port,
            request.path_and_query,
        )?;

        debug!("forwarding {} {uri}", request.method);

        let method = request
            .method
            .parse::<Method>()
            .map_err(|e| OuliError::Other(format!("invalid HTTP method '{}': {e}", request.method)))?;

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let http_request = builder
            .body(Full::new(Bytes::copy_from_slice(request.body)))
            .map_err(|e| OuliError::Other(format!("failed to build request: {e}")))?;

        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|e| OuliError::UpstreamConnectFail(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or("<invalid>").to_string(),
                )
            })
            .collect();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| OuliError::UpstreamIoFail(e.to_string()))?
            .to_bytes();

        Ok(ForwardedResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A request to forward to an upstream target.
#[derive(Debug)]
pub struct ForwardRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// `http` or `https`.
    pub scheme: &'a str,
    /// Target host.
    pub target_host: &'a str,
    /// Target port.
    pub target_port: u16,
    /// Path plus the raw `?query` string, unmodified.
    pub path_and_query: &'a str,
    /// Request headers.
    pub headers: &'a [(String, String)],
    /// Request body.
    pub body: &'a [u8],
}

/// The buffered response forwarded from a target.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

fn build_uri(scheme: &str, host: &str, port: u16, path_and_query: &str) -> Result<Uri> {
    let uri = format!("{scheme}://{host}:{port}{path_and_query}");
    uri.parse::<Uri>()
        .map_err(|e| OuliError::Other(format!("invalid URI '{uri}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_uri_simple() {
        let uri = build_uri("http", "example.com", 80, "/api/test").unwrap();
        assert_eq!(uri.to_string(), "http://example.com:80/api/test");
    }

    #[test]
    fn build_uri_with_query_preserves_raw_string() {
        let uri = build_uri("http", "example.com", 80, "/search?q=a+b&x=1").unwrap();
        assert_eq!(
            uri.to_string(),
            "http://example.com:80/search?q=a+b&x=1"
        );
    }

    #[test]
    fn build_uri_https_scheme() {
        let uri = build_uri("https", "example.com", 443, "/").unwrap();
        assert_eq!(uri.to_string(), "https://example.com:443/");
    }

    #[test]
    fn http_client_creation() {
        let client = HttpClient::new();
        assert!(std::mem::size_of_val(&client) > 0);
    }
}
