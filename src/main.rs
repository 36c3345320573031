//! Caching HTTP forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────┐
//!                   │                  CACHING PROXY                   │
//!                   │                                                  │
//!   Client ─────────┼─▶ net::listener ─▶ http::server ─▶ dispatcher    │
//!                   │                                     │  │  │      │
//!                   │            security::auth ◀─────────┘  │  │      │
//!                   │                                        │  │      │
//!                   │      tunnel (CONNECT) ◀────────────────┘  │      │
//!                   │          │                                │      │
//!                   │          └──── raw TCP ───────────────────┼──────┼──▶ Target
//!                   │                                           ▼      │
//!                   │      cache::store ◀── tee ◀── upstream::client ──┼──▶ Origin
//!                   │          ▲                                       │     (or next-hop proxy)
//!                   │      cache::sweep                                │
//!                   └──────────────────────────────────────────────────┘
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use caching_proxy::cache::CacheStore;
use caching_proxy::config::{self, validation::validate_config, ConfigError, ProxyConfig};
use caching_proxy::net::Listener;
use caching_proxy::observability::{logging, metrics};
use caching_proxy::{ProxyServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "caching-proxy")]
#[command(about = "Caching HTTP forward proxy with CONNECT tunnelling", long_about = None)]
struct Cli {
    /// TOML configuration file. Flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Required proxy credential, usually `user:pass`, matched verbatim.
    #[arg(long)]
    auth: Option<String>,

    /// Next-hop proxy URL for outbound requests.
    #[arg(long)]
    proxy: Option<String>,

    #[arg(long)]
    max_sockets: Option<usize>,

    /// Local address for outbound connections.
    #[arg(long)]
    local_address: Option<IpAddr>,

    #[arg(long)]
    follow_redirect: Option<bool>,

    /// Enable the response cache.
    #[arg(long)]
    cache: bool,

    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Cache TTL in milliseconds.
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Run one cache sweep and exit.
    #[arg(long)]
    sweep: bool,
}

impl Cli {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = match config.listener.bind_address.parse::<SocketAddr>() {
                Ok(mut addr) => {
                    addr.set_port(port);
                    addr.to_string()
                }
                Err(_) => format!("0.0.0.0:{}", port),
            };
        }
        if let Some(auth) = &self.auth {
            config.auth = Some(auth.clone());
        }
        if let Some(proxy) = &self.proxy {
            config.upstream.proxy = Some(proxy.clone());
        }
        if let Some(max_sockets) = self.max_sockets {
            config.upstream.max_sockets = max_sockets;
        }
        if let Some(addr) = self.local_address {
            config.upstream.local_address = Some(addr);
        }
        if let Some(follow) = self.follow_redirect {
            config.upstream.follow_redirect = follow;
        }
        if self.cache {
            config.cache.enabled = true;
        }
        if let Some(path) = &self.cache_path {
            config.cache.path = path.clone();
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache.ttl_ms = ttl;
        }
    }

    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::read_config(path)?,
            None => ProxyConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_logging(&config.observability);
    tracing::info!("caching-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if cli.sweep {
        let store = CacheStore::open(&config.cache.path, config.cache.write_buffer_chunks).await?;
        let report = store.sweep(config.cache.ttl()).await;
        tracing::info!(
            scanned = report.scanned,
            removed = report.removed,
            leftovers = report.leftovers,
            failed = report.failed,
            "Cache sweep complete"
        );
        return Ok(());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        cache_enabled = config.cache.enabled,
        upstream_proxy = ?config.upstream.proxy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = ProxyServer::new(config).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
