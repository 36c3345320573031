//! CONNECT tunnelling.
//!
//! # Data Flow
//! ```text
//! CONNECT host:port
//!     → connect upstream TCP (bounded by the default timeout)
//!     → 200 to the client, connection upgraded by hyper
//!     → relay.rs (two copy loops until close, error or idle timeout)
//! ```
//!
//! Connect failures are answered with 502 (or 504 on timeout). Once the relay
//! has started, failures just close both sides.

pub mod relay;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Uri},
    response::{IntoResponse, Response},
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::config::TunnelConfig;
use crate::error::ProxyError;
use crate::net::{ConnectionPermit, ConnectionTracker};
use crate::observability::metrics;

pub use relay::RelayStats;

/// Port used when the CONNECT target names none.
const DEFAULT_PORT: u16 = 80;

/// Opens tunnels for authorized CONNECT requests.
pub struct TunnelHandler {
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    tracker: ConnectionTracker,
}

impl TunnelHandler {
    pub fn new(
        config: &TunnelConfig,
        connect_timeout: Option<Duration>,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            connect_timeout,
            idle_timeout: config.idle_timeout(),
            tracker,
        }
    }

    /// Answer a CONNECT request. The relay runs on its own task after the
    /// response is sent.
    pub async fn open(&self, request: Request<Body>) -> Response {
        let (host, port) = match target(request.uri()) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(uri = %request.uri(), "CONNECT without a usable authority");
                metrics::record_tunnel("invalid");
                return e.into_response();
            }
        };

        let upstream = match self.connect(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(host = %host, port, error = %e, "Tunnel connect failed");
                metrics::record_tunnel(match &e {
                    ProxyError::UpstreamTimeout => "timeout",
                    _ => "connect_failed",
                });
                return e.into_response();
            }
        };

        let guard = self.tracker.track();
        let permit = request.extensions().get::<ConnectionPermit>().cloned();
        let idle = self.idle_timeout;
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            let upgraded = match hyper::upgrade::on(request).await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    tracing::warn!(host = %host, port, error = %e, "Client upgrade failed");
                    return;
                }
            };

            match relay::relay(TokioIo::new(upgraded), upstream, idle).await {
                Ok(stats) => tracing::debug!(
                    host = %host,
                    port,
                    sent = stats.client_to_upstream,
                    received = stats.upstream_to_client,
                    "Tunnel closed"
                ),
                Err(e) => tracing::debug!(host = %host, port, error = %e, "Tunnel torn down"),
            }
        });

        metrics::record_tunnel("established");
        Response::new(Body::empty())
    }

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, ProxyError> {
        let connect = TcpStream::connect((host, port));
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ProxyError::UpstreamTimeout)?,
            None => connect.await,
        }
        .map_err(|e| ProxyError::UpstreamConnect(format!("{}:{}: {}", host, port, e)))?;

        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

/// Host and port named by a CONNECT request target.
pub fn target(uri: &Uri) -> Result<(String, u16), ProxyError> {
    let authority = uri
        .authority()
        .ok_or_else(|| ProxyError::InvalidTarget(format!("{}: no authority", uri)))?;
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::InvalidTarget(format!("{}: empty host", uri)));
    }
    Ok((host.to_string(), authority.port_u16().unwrap_or(DEFAULT_PORT)))
}
