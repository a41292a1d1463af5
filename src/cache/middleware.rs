use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::{CacheEntry, CacheStatus, Config, KeyLocks, cache_control_value};
use crate::{
    Response,
    context::Context,
    middleware::{BoxResponseFuture, Middleware, Next},
};

/// Response cache middleware.
///
/// Serves stored responses for repeated `GET` requests and stores fresh ones
/// on a miss. Every response passing through gets the configured status header
/// set to `hit`, `miss` or `unreachable`.
///
/// Concurrent requests for the same fingerprint are serialized on a per-key
/// lock held from lookup to store, so a burst of identical misses runs the
/// handler once and the followers are served the stored result. Requests for
/// different fingerprints never wait on each other.
///
/// Storage failures never fail a request: a failed lookup falls through to the
/// handler and a failed store still returns the fresh response.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use rttp_cache::{Pipeline, Response, StatusCode, cache::{CacheMiddleware, Config}};
///
/// let pipeline = Pipeline::new()
///     .layer(CacheMiddleware::new(
///         Config::new().expiration(Duration::from_secs(30)).cache_control(true),
///     ))
///     .handler(|_ctx| async { Response::new(StatusCode::Ok).body("report") });
/// ```
#[derive(Clone)]
pub struct CacheMiddleware {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    locks: KeyLocks,
}

impl CacheMiddleware {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                locks: KeyLocks::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The per-fingerprint lock table.
    pub fn locks(&self) -> &KeyLocks {
        &self.shared.locks
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponseFuture {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { shared.serve(ctx, next).await })
    }
}

impl Shared {
    async fn serve(&self, ctx: Context, next: Next) -> Response {
        let config = &self.config;

        if !ctx.request().method().is_cacheable() {
            debug!(method = %ctx.request().method(), path = %ctx.request().path(), "method not cacheable");
            return self.pass_through(ctx, next).await;
        }
        if config.next.as_ref().is_some_and(|skip| skip(&ctx)) {
            debug!(path = %ctx.request().path(), "cache bypassed by predicate");
            return self.pass_through(ctx, next).await;
        }
        if config.is_disabled() {
            return self.pass_through(ctx, next).await;
        }

        let key = (config.key_generator)(&ctx);
        let _guard = self.locks.acquire(&key).await;

        let now = config.clock.now_millis();
        if let Some(entry) = self.lookup(&key, now).await {
            debug!(key = %key, status = entry.status.as_u16(), "cache hit");
            let mut response = entry.to_response(now);
            self.mark(&mut response, CacheStatus::Hit);
            return response;
        }

        let mut response = next.run(ctx).await;

        if !(config.cacheable)(&response) {
            debug!(key = %key, status = response.status().as_u16(), "response not cacheable");
            self.mark(&mut response, CacheStatus::Unreachable);
            return response;
        }

        let now = config.clock.now_millis();
        let expires_at = now.saturating_add(millis(config.expiration));
        let entry = CacheEntry::from_response(&response, expires_at, config.cache_control);
        self.store(&key, &entry).await;

        if config.cache_control {
            response.set_header("Cache-Control", cache_control_value(entry.max_age(now)));
        }
        debug!(key = %key, expires_at, "cache miss stored");
        self.mark(&mut response, CacheStatus::Miss);
        response
    }

    async fn pass_through(&self, ctx: Context, next: Next) -> Response {
        let mut response = next.run(ctx).await;
        self.mark(&mut response, CacheStatus::Unreachable);
        response
    }

    // Absent, expired, unreadable and corrupt entries all read as `None`.
    async fn lookup(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let raw = match self.config.storage.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, calling handler");
                return None;
            }
        };

        match CacheEntry::decode(&raw) {
            Ok(entry) if entry.is_fresh(now) => Some(entry),
            Ok(entry) => {
                debug!(key = %key, expires_at = entry.expires_at, "cache entry expired");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, len = raw.len(), "corrupt cache entry, discarding");
                if let Err(e) = self.config.storage.delete(key).await {
                    warn!(key = %key, error = %e, "failed to delete corrupt cache entry");
                }
                None
            }
        }
    }

    async fn store(&self, key: &str, entry: &CacheEntry) {
        let encoded: Bytes = match entry.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "response cannot be encoded, not caching");
                return;
            }
        };
        if let Err(e) = self
            .config
            .storage
            .set(key, encoded, self.config.expiration)
            .await
        {
            warn!(key = %key, error = %e, "cache store failed");
        }
    }

    fn mark(&self, response: &mut Response, status: CacheStatus) {
        response.set_header(self.config.cache_header.as_str(), status.as_str());
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
