//! Stream tee: one upstream body, two consumers.
//!
//! The client side is the stream itself; every chunk is yielded as soon as it
//! arrives. The cache side is a [`CacheSink`] fed with non-blocking offers, so
//! a slow or failing disk can only cost the cache entry, never client bytes.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;

use crate::cache::store::CacheSink;

/// Yields the inner stream unchanged while copying chunks into a cache sink.
///
/// - end of stream, or the declared length delivered: the sink is finished
///   and the entry committed
/// - stream error or drop before the end: the sink is aborted
/// - sink full or failed: the sink is dropped, streaming continues
pub struct TeeStream<S> {
    inner: S,
    sink: Option<CacheSink>,
    expected_len: Option<u64>,
    seen: u64,
}

impl<S> TeeStream<S> {
    pub fn new(inner: S, sink: CacheSink) -> Self {
        Self {
            inner,
            sink: Some(sink),
            expected_len: None,
            seen: 0,
        }
    }

    /// Commit as soon as `len` bytes have passed through.
    ///
    /// The HTTP server stops polling a body once its `Content-Length` is
    /// written, so end of stream may never be observed.
    pub fn with_expected_len(mut self, len: Option<u64>) -> Self {
        self.expected_len = len;
        self
    }

    /// Whether the cache side is still attached.
    pub fn is_caching(&self) -> bool {
        self.sink.is_some()
    }
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.seen += chunk.len() as u64;
                if let Some(sink) = this.sink.as_mut() {
                    if !sink.offer(chunk.clone()) {
                        tracing::debug!("Cache writer fell behind, abandoning entry");
                        this.sink = None;
                    }
                }
                match this.expected_len {
                    Some(len) if this.seen == len => {
                        if let Some(sink) = this.sink.take() {
                            let _ = sink.finish();
                        }
                    }
                    Some(len) if this.seen > len => {
                        tracing::debug!(expected = len, seen = this.seen, "Body longer than declared");
                        if let Some(sink) = this.sink.take() {
                            let _ = sink.abort();
                        }
                    }
                    _ => {}
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                if let Some(sink) = this.sink.take() {
                    let _ = sink.abort();
                }
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some(sink) = this.sink.take() {
                    let _ = sink.finish();
                }
                Poll::Ready(None)
            }
        }
    }
}
