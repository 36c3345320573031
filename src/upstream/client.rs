//! Outbound HTTP client.
//!
//! # Responsibilities
//! - Build the shared `reqwest` client from `UpstreamConfig`
//!   (next-hop proxy, local address, redirect policy)
//! - Bound concurrent outbound requests (`max_sockets`); excess requests queue
//! - Resolve the effective per-request timeout
//! - Map transport failures to `ProxyError`

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::Semaphore;
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Redirect hops followed when `follow_redirect` is on.
const MAX_REDIRECTS: usize = 10;

/// Everything needed to issue one upstream request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    /// Forwarded headers (hop-by-hop and proxy-only headers already removed).
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

/// Upstream response with a streaming body.
///
/// The body holds the outbound concurrency permit until it is fully read or dropped.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

/// Shared outbound client.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    default_timeout: Option<Duration>,
    chained: bool,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_sockets)
            .redirect(if config.follow_redirect {
                reqwest::redirect::Policy::limited(MAX_REDIRECTS)
            } else {
                reqwest::redirect::Policy::none()
            });

        builder = match &config.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.as_str())
                    .map_err(|e| ProxyError::Internal(format!("invalid upstream proxy: {}", e)))?;
                builder.proxy(proxy)
            }
            // Never pick up HTTP_PROXY and friends from the environment.
            None => builder.no_proxy(),
        };

        if let Some(addr) = config.local_address {
            builder = builder.local_address(addr);
        }

        let client = builder
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream client: {}", e)))?;

        tracing::info!(
            chained = config.proxy.is_some(),
            max_sockets = config.max_sockets,
            follow_redirect = config.follow_redirect,
            "Upstream client ready"
        );

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_sockets.max(1))),
            default_timeout: config.timeout(),
            chained: config.proxy.is_some(),
        })
    }

    /// Whether requests go through a next-hop proxy.
    pub fn is_chained(&self) -> bool {
        self.chained
    }

    /// Timeout for a request carrying an optional `Proxy-Timeout` override.
    ///
    /// The override is ignored when chained; the next hop applies its own.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        if self.chained {
            self.default_timeout
        } else {
            requested.or(self.default_timeout)
        }
    }

    /// Free outbound slots.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Issue the request. Waits for a free outbound slot first.
    pub async fn send(
        &self,
        request: UpstreamRequest,
        body: reqwest::Body,
    ) -> Result<UpstreamResponse, ProxyError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProxyError::Internal("upstream limiter closed".into()))?;

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                let _held = &permit;
                chunk
            })
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
