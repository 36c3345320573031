//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, upgrades, tracing layer)
//!     → dispatcher.rs (auth, CONNECT, cache lookup)
//!     → request.rs (client body: stream upstream or buffer for keying)
//!     → [upstream client or cache replay]
//!     → response.rs (relay or replay, tee into cache)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{CacheOutcome, Dispatcher};
pub use server::ProxyServer;
