//! Response caching: the decision engine and its collaborators.
//!
//! [`CacheMiddleware`] sits in a [`Pipeline`](crate::middleware::Pipeline) in
//! front of an expensive handler. For each request it either replays a stored
//! response, or runs the handler and stores what it produced:
//!
//! ```text
//! request ─► bypass? ──yes──► handler ─► X-Cache: unreachable
//!              │ no
//!              ▼
//!         fingerprint ─► lock(key) ─► storage.get ─► fresh entry? ──yes──► X-Cache: hit
//!                                                         │ no
//!                                                         ▼
//!                                     handler ─► cacheable? ──no──► X-Cache: unreachable
//!                                                         │ yes
//!                                                         ▼
//!                                     storage.set(encode(entry)) ─► X-Cache: miss
//! ```
//!
//! ## Pieces
//!
//! - [`Config`] / [`CacheSettings`]: expiration, headers, predicates, storage.
//! - [`fingerprint`]: the default key: path plus raw query string.
//! - [`CacheEntry`]: the stored tuple and its binary codec.
//! - [`Storage`]: pluggable byte store with TTL; [`MemoryStorage`] by default.
//! - [`KeyLocks`]: per-fingerprint mutual exclusion.
//! - [`Clock`]: time source for entry expiry.
//!
//! The default fingerprint ignores the request method. That is harmless while
//! only `GET` is cacheable, but a custom key generator that routes other
//! requests into shared storage should include the method itself.

use std::fmt;

mod clock;
mod config;
mod entry;
mod key;
mod lock;
mod middleware;
mod storage;


pub use clock::{Clock, SystemClock};
pub use config::{
    CacheSettings, Config, DEFAULT_CACHE_HEADER, DEFAULT_EXPIRATION, KeyGenerator,
    ResponsePredicate, SkipPredicate,
};
pub use entry::{CacheEntry, CodecError};
pub use key::fingerprint;
pub use lock::{KeyGuard, KeyLocks};
pub use middleware::CacheMiddleware;
pub use storage::{BoxError, MemoryStorage, Storage, StorageError, StorageFuture};

/// Outcome of the cache for one request, reported in the status header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from storage without running the handler.
    Hit,
    /// Handler ran and its response was stored.
    Miss,
    /// Not eligible: bypassed, non-cacheable method or response, or caching disabled.
    Unreachable,
}

impl CacheStatus {
    /// The literal header token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats a `Cache-Control` value for a public response fresh for `max_age` seconds.
pub(crate) fn cache_control_value(max_age: u64) -> String {
    format!("public, max-age={max_age}")
}
