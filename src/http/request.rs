//! Client request body handling.
//!
//! # Responsibilities
//! - Turn the client body into an upstream body without buffering it
//! - Buffer bodies that take part in the cache key, up to a fixed limit
//!
//! # Design Decisions
//! - Buffering is bounded: past the limit the request is forwarded uncached,
//!   with the bytes already read replayed in front of the rest of the stream

use axum::body::{Body, HttpBody};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};

use crate::error::ProxyError;

/// Result of trying to buffer a request body for keying.
pub enum Buffered {
    /// The whole body, within the limit.
    Complete(Bytes),
    /// Over the limit: the full body, re-assembled as a stream.
    Overflow(Body),
}

/// Read the body into memory if it fits in `limit` bytes.
pub async fn buffer_body(body: Body, limit: usize) -> Result<Buffered, ProxyError> {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| ProxyError::ClientBody(e.to_string()))?;
        total += chunk.len();
        chunks.push(chunk);

        if total > limit {
            tracing::debug!(limit, "Request body exceeds key buffer, forwarding uncached");
            let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Overflow(Body::from_stream(prefix.chain(data))));
        }
    }

    if chunks.len() == 1 {
        return Ok(Buffered::Complete(chunks.remove(0)));
    }
    let mut buf = BytesMut::with_capacity(total);
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(buf.freeze()))
}

/// Stream the client body upstream. Empty bodies stay empty instead of
/// becoming a chunked upload.
pub fn upstream_body(body: Body) -> reqwest::Body {
    if body.is_end_stream() {
        reqwest::Body::from(Bytes::new())
    } else {
        reqwest::Body::wrap_stream(body.into_data_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static [u8]]) -> Body {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Body::from_stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn small_body_is_buffered() {
        match buffer_body(chunked(&[b"some ", b"post ", b"data"]), 64).await.unwrap() {
            Buffered::Complete(bytes) => assert_eq!(&bytes[..], b"some post data"),
            Buffered::Overflow(_) => panic!("body fits in the limit"),
        }
    }

    #[tokio::test]
    async fn large_body_is_reassembled_intact() {
        let body = chunked(&[b"0123456789", b"abcdefghij", b"KLMNOPQRST"]);
        match buffer_body(body, 12).await.unwrap() {
            Buffered::Complete(_) => panic!("body exceeds the limit"),
            Buffered::Overflow(body) => {
                let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                assert_eq!(&bytes[..], b"0123456789abcdefghijKLMNOPQRST");
            }
        }
    }

    #[tokio::test]
    async fn empty_body_buffers_to_nothing() {
        match buffer_body(Body::empty(), 16).await.unwrap() {
            Buffered::Complete(bytes) => assert!(bytes.is_empty()),
            Buffered::Overflow(_) => panic!("empty body overflowed"),
        }
    }
}
