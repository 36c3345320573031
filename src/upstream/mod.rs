//! Upstream subsystem: the outbound side of the proxy.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → request.rs (client request → UpstreamRequest: target URL, headers, timeout)
//!     → client.rs (bounded reqwest client, optional next-hop proxy)
//!     → UpstreamResponse (status, headers, streaming body)
//! ```

pub mod client;
pub mod request;

pub use client::{UpstreamClient, UpstreamRequest, UpstreamResponse};
