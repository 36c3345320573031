//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → auth.rs (Proxy-Authorization gate, header always stripped)
//!     → headers.rs (hop-by-hop and proxy-only headers removed before forwarding)
//! ```

pub mod auth;
pub mod headers;

pub use auth::{AuthOutcome, ProxyAuth};
