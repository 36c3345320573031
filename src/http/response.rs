//! Response construction.
//!
//! # Responsibilities
//! - Relay an upstream response to the client, optionally teeing it to the cache
//! - Replay a cached entry
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Replayed `Content-Length` comes from the body artifact, not the stored headers

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use tokio_util::io::ReaderStream;

use crate::cache::{CacheSink, CachedEntry, TeeStream};
use crate::security::headers::forwarded_response_headers;
use crate::upstream::UpstreamResponse;

/// Relay an upstream response. With a sink, the body is copied into the cache as it streams.
///
/// Responses that carry no body (HEAD, 204, `Content-Length: 0`) are committed
/// to the cache right away, since the server never polls their body.
pub fn relay(upstream: UpstreamResponse, sink: Option<CacheSink>, head: bool) -> Response {
    let expected_len = upstream
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let bodiless = head || upstream.status == StatusCode::NO_CONTENT || expected_len == Some(0);

    let body = match sink {
        Some(sink) if bodiless => {
            let _ = sink.finish();
            Body::from_stream(upstream.body)
        }
        Some(sink) => Body::from_stream(
            TeeStream::new(upstream.body, sink).with_expected_len(expected_len),
        ),
        None => Body::from_stream(upstream.body),
    };

    let mut response = Response::new(body);
    *response.status_mut() = upstream.status;
    *response.headers_mut() = forwarded_response_headers(&upstream.headers);
    response
}

/// Serve a cached entry: status 200, stored headers, stored body.
///
/// HEAD entries keep their stored `Content-Length`, since their body artifact is empty.
pub fn replay(entry: CachedEntry, head: bool) -> Response {
    let mut headers = entry.headers;
    if !head {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.len));
    }

    let mut response = Response::new(Body::from_stream(ReaderStream::new(entry.body)));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}
