//! Per-request decision logic.
//!
//! # Responsibilities
//! - Gate every request through proxy authentication
//! - Hand CONNECT to the tunnel handler
//! - Key cacheable requests and serve fresh entries from disk
//! - Forward everything else upstream, teeing 2xx bodies into the cache
//!
//! # Design Decisions
//! - No per-key locking: concurrent misses each fetch, last writer wins
//! - Stale and corrupt entries are treated as misses, never as errors

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::cache::key::{body_is_keyed, is_cacheable_method};
use crate::cache::{CacheError, CacheKey, CacheStore, CachedEntry};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{buffer_body, upstream_body, Buffered};
use crate::http::response::{relay, replay};
use crate::net::ConnectionTracker;
use crate::observability::metrics;
use crate::security::headers::forwarded_response_headers;
use crate::security::ProxyAuth;
use crate::tunnel::TunnelHandler;
use crate::upstream::{request as upstream_request, UpstreamClient};

/// How the cache took part in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Caching is off, or the request never reached the cache.
    Disabled,
    /// Not cacheable: method, or body too large to key.
    Bypass,
    Hit,
    Miss,
    Stale,
    Corrupt,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Disabled => "none",
            CacheOutcome::Bypass => "bypass",
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Corrupt => "corrupt",
        }
    }
}

enum Lookup {
    Fresh(CachedEntry),
    Missing(CacheOutcome),
}

/// Cache settings bound to an open store.
struct CachePolicy {
    store: CacheStore,
    ttl: Duration,
    max_key_body_bytes: usize,
}

impl CachePolicy {
    async fn lookup(&self, key: &CacheKey) -> Lookup {
        if !self.store.exists(key).await {
            return Lookup::Missing(CacheOutcome::Miss);
        }

        match self.store.is_stale(key, self.ttl).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(key = %key, "Cache entry stale");
                if let Err(e) = self.store.delete(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to delete stale entry");
                }
                return Lookup::Missing(CacheOutcome::Stale);
            }
            // Swept or replaced between the two checks.
            Err(CacheError::NotFound) => return Lookup::Missing(CacheOutcome::Miss),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache entry unreadable");
                return Lookup::Missing(CacheOutcome::Corrupt);
            }
        }

        match self.store.read(key).await {
            Ok(entry) => Lookup::Fresh(entry),
            Err(CacheError::NotFound) => Lookup::Missing(CacheOutcome::Miss),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache entry unreadable");
                Lookup::Missing(CacheOutcome::Corrupt)
            }
        }
    }
}

/// Routes each client request to the tunnel, the cache or the upstream.
pub struct Dispatcher {
    auth: ProxyAuth,
    upstream: UpstreamClient,
    cache: Option<CachePolicy>,
    tunnel: TunnelHandler,
}

impl Dispatcher {
    pub async fn new(config: &ProxyConfig, tracker: ConnectionTracker) -> Result<Self, ProxyError> {
        let upstream = UpstreamClient::new(&config.upstream)?;

        let cache = if config.cache.enabled {
            let store = CacheStore::open(&config.cache.path, config.cache.write_buffer_chunks)
                .await
                .map_err(|e| {
                    ProxyError::Internal(format!(
                        "cannot open cache directory {}: {}",
                        config.cache.path.display(),
                        e
                    ))
                })?;
            tracing::info!(
                path = %config.cache.path.display(),
                ttl_ms = config.cache.ttl_ms,
                "Response cache enabled"
            );
            Some(CachePolicy {
                store,
                ttl: config.cache.ttl(),
                max_key_body_bytes: config.cache.max_key_body_bytes,
            })
        } else {
            None
        };

        Ok(Self {
            auth: ProxyAuth::new(config.auth.clone()),
            upstream,
            cache,
            tunnel: TunnelHandler::new(&config.tunnel, config.upstream.timeout(), tracker),
        })
    }

    /// The open cache store, when caching is enabled.
    pub fn cache_store(&self) -> Option<&CacheStore> {
        self.cache.as_ref().map(|c| &c.store)
    }

    /// Handle one client request. Never fails: errors become status responses.
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().clone();

        if !self.auth.authorize(request.headers_mut()).is_authorized() {
            tracing::warn!(method = %method, uri = %request.uri(), "Proxy authorization failed");
            let response = ProxyError::Unauthorized.into_response();
            metrics::record_request(method.as_str(), response.status().as_u16(), "none", start);
            return response;
        }

        if method == Method::CONNECT {
            let response = self.tunnel.open(request).await;
            metrics::record_request(method.as_str(), response.status().as_u16(), "none", start);
            return response;
        }

        let uri = request.uri().clone();
        let (response, outcome) = match self.forward(request).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(method = %method, uri = %uri, error = %e, "Request failed");
                (e.into_response(), CacheOutcome::Disabled)
            }
        };

        tracing::debug!(
            method = %method,
            uri = %uri,
            status = response.status().as_u16(),
            cache = outcome.as_str(),
            "Request served"
        );
        metrics::record_request(
            method.as_str(),
            response.status().as_u16(),
            outcome.as_str(),
            start,
        );
        response
    }

    async fn forward(&self, request: Request<Body>) -> Result<(Response, CacheOutcome), ProxyError> {
        let (mut parts, body) = request.into_parts();
        let outbound = upstream_request::describe(&mut parts, &self.upstream)?;
        let head = parts.method == Method::HEAD;

        let Some(cache) = &self.cache else {
            let response = self.upstream.send(outbound, upstream_body(body)).await?;
            return Ok((relay(response, None, head), CacheOutcome::Disabled));
        };
        if !is_cacheable_method(&parts.method) {
            metrics::record_cache_lookup(CacheOutcome::Bypass.as_str());
            let response = self.upstream.send(outbound, upstream_body(body)).await?;
            return Ok((relay(response, None, head), CacheOutcome::Bypass));
        }

        let (key_body, body) = if body_is_keyed(&parts.method) {
            match buffer_body(body, cache.max_key_body_bytes).await? {
                Buffered::Complete(bytes) => (bytes.clone(), reqwest::Body::from(bytes)),
                Buffered::Overflow(body) => {
                    metrics::record_cache_lookup(CacheOutcome::Bypass.as_str());
                    let response = self.upstream.send(outbound, upstream_body(body)).await?;
                    return Ok((relay(response, None, head), CacheOutcome::Bypass));
                }
            }
        } else {
            (Bytes::new(), upstream_body(body))
        };

        let key = CacheKey::compute(
            &outbound.method,
            outbound.url.as_str(),
            &outbound.headers,
            &key_body,
        );

        let outcome = match cache.lookup(&key).await {
            Lookup::Fresh(entry) => {
                tracing::debug!(key = %key, len = entry.len, "Cache hit");
                metrics::record_cache_lookup(CacheOutcome::Hit.as_str());
                return Ok((replay(entry, head), CacheOutcome::Hit));
            }
            Lookup::Missing(outcome) => outcome,
        };
        metrics::record_cache_lookup(outcome.as_str());

        let response = self.upstream.send(outbound, body).await?;
        let sink = response.status.is_success().then(|| {
            tracing::debug!(key = %key, status = response.status.as_u16(), "Caching response");
            cache
                .store
                .write(&key, &forwarded_response_headers(&response.headers))
        });

        Ok((relay(response, sink, head), outcome))
    }
}
