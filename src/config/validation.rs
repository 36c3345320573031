//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, ttl > 0)
//! - Validate addresses and the upstream chain URI
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.auth.as_deref() == Some("") {
        errors.push(ValidationError::new("auth", "must not be empty"));
    }

    if config.upstream.max_sockets == 0 {
        errors.push(ValidationError::new("upstream.max_sockets", "must be greater than 0"));
    }
    if config.upstream.timeout_ms == Some(0) {
        errors.push(ValidationError::new("upstream.timeout_ms", "must be greater than 0"));
    }
    if let Some(proxy) = &config.upstream.proxy {
        match url::Url::parse(proxy) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            Ok(url) => errors.push(ValidationError::new(
                "upstream.proxy",
                format!("unsupported proxy URI: {}", url),
            )),
            Err(e) => errors.push(ValidationError::new(
                "upstream.proxy",
                format!("invalid URI: {}", e),
            )),
        }
    }

    if config.cache.enabled && config.cache.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("cache.path", "required when the cache is enabled"));
    }
    if config.cache.ttl_ms == 0 {
        errors.push(ValidationError::new("cache.ttl_ms", "must be greater than 0"));
    }
    if config.cache.sweep_interval_ms == Some(0) {
        errors.push(ValidationError::new("cache.sweep_interval_ms", "must be greater than 0"));
    }
    if config.cache.write_buffer_chunks == 0 {
        errors.push(ValidationError::new("cache.write_buffer_chunks", "must be greater than 0"));
    }

    if config.tunnel.idle_timeout_ms == Some(0) {
        errors.push(ValidationError::new("tunnel.idle_timeout_ms", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
