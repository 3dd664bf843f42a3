use crate::constants::HOP_BY_HOP_HEADERS;
use crate::error::{HookError, Result};
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use tracing::debug;

/// Relays requests to the local target over one pooled client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    base_url: String,
}

impl Forwarder {
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HookError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: format!("http://{target}") })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Method, path+query, body and end-to-end headers go through unchanged.
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(%method, %url, "relaying request");
        let upstream = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(upstream_error)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(upstream_error)?;

        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let mut response = body.into_response();
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Removes connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied().chain(named.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

fn upstream_error(e: reqwest::Error) -> HookError {
    if e.is_timeout() {
        HookError::UpstreamTimeout
    } else if e.is_connect() || e.is_request() || e.is_body() {
        HookError::UpstreamUnreachable
    } else {
        HookError::Internal(format!("relay failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_listed_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Trace-Hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert("x-trace-hop", HeaderValue::from_static("1"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));

        strip_hop_by_hop(&mut headers);

        for gone in ["connection", "keep-alive", "transfer-encoding", "upgrade", "x-trace-hop"] {
            assert!(!headers.contains_key(gone), "{gone} survived");
        }
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-custom"], "kept");
    }

    #[tokio::test]
    async fn unreachable_target_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = listener.local_addr().unwrap().to_string();
        drop(listener);

        let forwarder = Forwarder::new(&target, Duration::from_secs(2)).unwrap();
        let err = forwarder
            .forward(Method::POST, "/webhook", HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UpstreamUnreachable));
    }

    #[tokio::test]
    async fn silent_target_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let forwarder = Forwarder::new(&target, Duration::from_millis(300)).unwrap();
        let err = forwarder
            .forward(Method::GET, "/webhook?x=1", HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UpstreamTimeout));
    }
}
