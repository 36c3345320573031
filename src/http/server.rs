//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Accept connections from the listener until shutdown
//! - Serve each connection with hyper HTTP/1.1, upgrades enabled for CONNECT
//! - Wire up middleware (request tracing)
//! - Run the cache sweeper alongside the accept loop
//! - Drain open connections on shutdown
//!
//! # Design Decisions
//! - The service is built directly on hyper rather than an axum `Router`, since
//!   CONNECT requests carry an authority-form target that no route matches
//! - Each connection gets its own shutdown receiver and finishes in-flight
//!   requests before closing

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::{body::Incoming, server::conn::http1, Request};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::cache::Sweeper;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::dispatcher::Dispatcher;
use crate::lifecycle::shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// The proxy server.
pub struct ProxyServer {
    config: ProxyConfig,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    /// Create a server with the given configuration. Opens the cache
    /// directory and builds the upstream client.
    pub async fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let tracker = ConnectionTracker::new();
        let dispatcher = Dispatcher::new(&config, tracker.clone()).await?;
        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            tracker,
        })
    }

    /// Open client connections and tunnels.
    pub fn connections(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Run the server until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            cache = self.config.cache.enabled,
            chained = self.config.upstream.proxy.is_some(),
            auth = self.config.auth.is_some(),
            "Proxy server starting"
        );

        if let Some(store) = self.dispatcher.cache_store() {
            if self.config.cache.sweep_enabled {
                let sweeper = Sweeper::new(
                    store.clone(),
                    self.config.cache.ttl(),
                    self.config.cache.sweep_interval(),
                );
                tokio::spawn(sweeper.run(shutdown.resubscribe()));
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.serve(stream, peer, permit, shutdown.resubscribe());
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        drop(listener);
        let deadline = Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        if shutdown::drain(&self.tracker, deadline).await {
            tracing::info!("Proxy server stopped");
        }
        Ok(())
    }

    fn serve(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let guard = self.tracker.track();
        let dispatcher = self.dispatcher.clone();
        let _ = stream.set_nodelay(true);

        tokio::spawn(async move {
            let id = guard.id();

            let service = ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .map_request(move |request: Request<Incoming>| {
                    let mut request = request.map(Body::new);
                    request.extensions_mut().insert(permit.clone());
                    request
                })
                .service_fn(move |request: Request<Body>| {
                    let dispatcher = dispatcher.clone();
                    async move { Ok::<_, Infallible>(dispatcher.handle(request).await) }
                });

            let conn = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                .with_upgrades();
            let mut conn = std::pin::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };

            if let Err(e) = result {
                tracing::debug!(connection = %id, peer = %peer, error = %e, "Connection closed with error");
            }
            drop(guard);
        });
    }
}
