//! Header manipulation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Strip proxy-only headers (`Proxy-Authorization`, `Proxy-Timeout`) before forwarding
//! - Strip `Host`; the upstream client derives it from the target URI
//!
//! # Design Decisions
//! - Headers named by `Connection` are hop-by-hop too (RFC 9110 §7.6.1)
//! - Framing headers are dropped; hyper re-frames every message

use axum::http::{header, HeaderMap, HeaderName};

/// Per-request timeout override, in milliseconds.
pub const PROXY_TIMEOUT: HeaderName = HeaderName::from_static("proxy-timeout");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including those listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Header set sent upstream for a client request.
pub fn forwarded_request_headers(client: &HeaderMap) -> HeaderMap {
    let mut headers = client.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::PROXY_AUTHORIZATION);
    headers.remove(PROXY_TIMEOUT);
    headers.remove(header::HOST);
    headers
}

/// Header set relayed to the client (and persisted) for an upstream response.
pub fn forwarded_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    strip_hop_by_hop(&mut headers);
    headers
}
