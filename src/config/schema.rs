//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the caching proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Required proxy credential as `user:pass`. `None` disables the auth gate.
    pub auth: Option<String>,

    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Outbound client settings.
    pub upstream: UpstreamConfig,

    /// On-disk response cache.
    pub cache: CacheConfig,

    /// CONNECT tunnel settings.
    pub tunnel: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Outbound request configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Next-hop proxy URI. When set, every plain HTTP request is routed through it.
    pub proxy: Option<String>,

    /// Maximum concurrent outbound requests. Excess requests queue.
    pub max_sockets: usize,

    /// Local address to bind outbound connections to.
    pub local_address: Option<IpAddr>,

    /// Follow upstream redirects instead of relaying them.
    pub follow_redirect: bool,

    /// Default per-request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            max_sockets: 256,
            local_address: None,
            follow_redirect: true,
            timeout_ms: None,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the on-disk cache.
    pub enabled: bool,

    /// Cache directory. Created on startup if missing.
    pub path: PathBuf,

    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,

    /// Background sweep interval in milliseconds (default: ttl / 2).
    pub sweep_interval_ms: Option<u64>,

    /// Run the in-process sweeper. Disable when sweeps are scheduled externally.
    pub sweep_enabled: bool,

    /// Largest request body buffered to compute a cache key.
    pub max_key_body_bytes: usize,

    /// Chunks buffered between the client stream and the cache writer.
    pub write_buffer_chunks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("./cache"),
            ttl_ms: 60_000,
            sweep_interval_ms: None,
            sweep_enabled: true,
            max_key_body_bytes: 2 * 1024 * 1024, // 2MB
            write_buffer_chunks: 64,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        match self.sweep_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis((self.ttl_ms / 2).max(1)),
        }
    }
}

/// CONNECT tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Tear a tunnel down after this long without traffic in either direction.
    pub idle_timeout_ms: Option<u64>,
}

impl TunnelConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for open connections to finish.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}
