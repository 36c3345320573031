//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → key.rs (method + URI + headers + body → CacheKey)
//!     → store.rs (exists / is_stale / read / write / delete)
//!     → tee.rs (upstream body → client, copy → store writer task)
//!
//! Background:
//!     sweep.rs (interval) → store.rs sweep(ttl)
//! ```
//!
//! # Design Decisions
//! - No in-flight coalescing: concurrent misses may both write, last commit wins
//! - A striped commit lock keeps each key's header and body renames paired
//! - Body rename is the commit point; partial writes never become visible
//! - Cache failures degrade to a miss, never to a client error

pub mod key;
pub mod store;
pub mod sweep;
pub mod tee;

pub use key::CacheKey;
pub use store::{CacheError, CacheSink, CacheStore, CachedEntry, SweepReport, WriteOutcome};
pub use sweep::Sweeper;
pub use tee::TeeStream;
