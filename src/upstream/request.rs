//! Client request → upstream descriptor.
//!
//! # Responsibilities
//! - Resolve the target URL (absolute-form as sent to a forward proxy,
//!   otherwise origin-form resolved against `Host`)
//! - Consume the `Proxy-Timeout` header
//! - Compute the forwarded header set

use std::time::Duration;

use axum::http::{header, request::Parts, HeaderMap, Uri};
use url::Url;

use crate::error::ProxyError;
use crate::security::headers::{forwarded_request_headers, PROXY_TIMEOUT};
use crate::upstream::client::{UpstreamClient, UpstreamRequest};

/// Build the upstream descriptor for a client request.
///
/// `Proxy-Timeout` is removed from `parts.headers` whether or not it is honored.
pub fn describe(parts: &mut Parts, client: &UpstreamClient) -> Result<UpstreamRequest, ProxyError> {
    let requested = take_timeout_override(&mut parts.headers);
    let url = target_url(&parts.uri, &parts.headers)?;

    Ok(UpstreamRequest {
        method: parts.method.clone(),
        url,
        headers: forwarded_request_headers(&parts.headers),
        timeout: client.effective_timeout(requested),
    })
}

/// Remove `Proxy-Timeout` and return it if it holds an integer millisecond value.
pub fn take_timeout_override(headers: &mut HeaderMap) -> Option<Duration> {
    let value = headers.remove(PROXY_TIMEOUT)?;
    match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(ms) => Some(Duration::from_millis(ms)),
        None => {
            tracing::debug!(value = ?value, "Ignoring unparseable Proxy-Timeout");
            None
        }
    }
}

/// Absolute URL the request should be sent to.
pub fn target_url(uri: &Uri, headers: &HeaderMap) -> Result<Url, ProxyError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", uri, e)));
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ProxyError::InvalidTarget(format!("{}: no host", uri)))?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    Url::parse(&format!("http://{}{}", host, path))
        .map_err(|e| ProxyError::InvalidTarget(format!("{}{}: {}", host, path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use axum::http::{HeaderValue, Method, Request};

    #[test]
    fn absolute_form_is_used_as_is() {
        let uri: Uri = "http://example.com:8080/a?b=c".parse().unwrap();
        let url = target_url(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(url.as_str(), "http://example.com:8080/a?b=c");
    }

    #[test]
    fn origin_form_uses_host_header() {
        let uri: Uri = "/path?q=1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("origin.test"));
        let url = target_url(&uri, &headers).unwrap();
        assert_eq!(url.as_str(), "http://origin.test/path?q=1");
    }

    #[test]
    fn origin_form_without_host_is_rejected() {
        let uri: Uri = "/path".parse().unwrap();
        assert!(matches!(
            target_url(&uri, &HeaderMap::new()),
            Err(ProxyError::InvalidTarget(_))
        ));
    }

    #[test]
    fn timeout_header_is_consumed_even_when_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_TIMEOUT, HeaderValue::from_static("250"));
        assert_eq!(take_timeout_override(&mut headers), Some(Duration::from_millis(250)));
        assert!(headers.is_empty());

        headers.insert(PROXY_TIMEOUT, HeaderValue::from_static("soon"));
        assert_eq!(take_timeout_override(&mut headers), None);
        assert!(headers.is_empty());
    }

    #[test]
    fn describe_strips_proxy_headers() {
        let client = UpstreamClient::new(&UpstreamConfig::default()).unwrap();
        let (mut parts, ()) = Request::builder()
            .method(Method::POST)
            .uri("http://example.com/submit")
            .header("proxy-timeout", "1500")
            .header("proxy-authorization", "Basic dXNlcjpwYXNz")
            .header("x-trace", "abc")
            .body(())
            .unwrap()
            .into_parts();

        let request = describe(&mut parts, &client).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.timeout, Some(Duration::from_millis(1500)));
        assert!(request.headers.get("proxy-timeout").is_none());
        assert!(request.headers.get("proxy-authorization").is_none());
        assert_eq!(request.headers["x-trace"], "abc");
    }
}
