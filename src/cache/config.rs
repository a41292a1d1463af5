use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;

use super::{Clock, MemoryStorage, Storage, SystemClock, key::fingerprint};
use crate::{Response, StatusCode, context::Context};

/// Header carrying the cache status token unless overridden.
pub const DEFAULT_CACHE_HEADER: &str = "X-Cache";

/// Lifetime of new entries unless overridden.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60);

/// Derives the cache key for a request.
pub type KeyGenerator = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// Returns `true` to skip the cache entirely for a request.
pub type SkipPredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Returns `true` if a handler's response may be stored.
pub type ResponsePredicate = Arc<dyn Fn(&Response) -> bool + Send + Sync>;

/// Configuration for [`CacheMiddleware`](super::CacheMiddleware).
///
/// Built with chainable setters over sensible defaults:
///
/// | Setting          | Default                                   |
/// |------------------|-------------------------------------------|
/// | `expiration`     | 60 seconds                                |
/// | `cache_control`  | `false`                                   |
/// | `cache_header`   | `X-Cache`                                 |
/// | `key_generator`  | [`fingerprint`] (path + raw query)        |
/// | `next`           | none (never skip)                         |
/// | `cacheable`      | status is `200 OK`                        |
/// | `storage`        | a new, private [`MemoryStorage`]          |
/// | `clock`          | [`SystemClock`]                           |
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use rttp_cache::cache::Config;
///
/// let config = Config::new()
///     .expiration(Duration::from_secs(10))
///     .cache_control(true)
///     .next(|ctx| ctx.request().headers().contains("authorization"))
///     .key_generator(|ctx| {
///         format!("{}:{}", ctx.request().method(), ctx.request().path())
///     });
/// ```
#[derive(Clone)]
pub struct Config {
    pub(crate) expiration: Duration,
    pub(crate) cache_control: bool,
    pub(crate) cache_header: String,
    pub(crate) key_generator: KeyGenerator,
    pub(crate) next: Option<SkipPredicate>,
    pub(crate) cacheable: ResponsePredicate,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            cache_control: false,
            cache_header: DEFAULT_CACHE_HEADER.to_owned(),
            key_generator: Arc::new(fingerprint),
            next: None,
            cacheable: Arc::new(|response: &Response| response.status() == StatusCode::Ok),
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds a config from declarative settings, defaults for everything else.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new()
            .expiration(settings.expiration())
            .cache_control(settings.cache_control)
            .cache_header(settings.cache_header.as_str())
    }

    /// Lifetime of new entries. [`Duration::ZERO`] disables caching: requests
    /// always reach the handler and storage is never touched.
    #[must_use]
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Emit `Cache-Control: public, max-age=<n>` on hits and misses.
    #[must_use]
    pub fn cache_control(mut self, enabled: bool) -> Self {
        self.cache_control = enabled;
        self
    }

    /// Name of the response header carrying `hit`, `miss` or `unreachable`.
    #[must_use]
    pub fn cache_header(mut self, name: impl Into<String>) -> Self {
        self.cache_header = name.into();
        self
    }

    /// Replaces the default fingerprint. Called once per eligible request.
    #[must_use]
    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(generator);
        self
    }

    /// Bypass predicate evaluated before any cache logic; `true` skips caching.
    #[must_use]
    pub fn next<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(predicate));
        self
    }

    /// Decides whether a fresh response may be stored. Rejected responses are
    /// returned untouched apart from the `unreachable` status header.
    #[must_use]
    pub fn cacheable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        self.cacheable = Arc::new(predicate);
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    /// Uses an already shared storage handle.
    #[must_use]
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Returns `true` when the expiration disables caching.
    pub fn is_disabled(&self) -> bool {
        self.expiration.is_zero()
    }

    pub fn expiration_duration(&self) -> Duration {
        self.expiration
    }

    pub fn cache_header_name(&self) -> &str {
        &self.cache_header
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("expiration", &self.expiration)
            .field("cache_control", &self.cache_control)
            .field("cache_header", &self.cache_header)
            .field("next", &self.next.is_some())
            .finish_non_exhaustive()
    }
}

/// Declarative cache settings, e.g. from a JSON or TOML config file.
///
/// `expiration_secs` is signed: zero or negative disables caching.
///
/// ```rust
/// use rttp_cache::cache::{CacheSettings, Config};
///
/// let settings =
///     CacheSettings::from_json(r#"{ "expiration_secs": 30, "cache_control": true }"#).unwrap();
/// let config = Config::from_settings(&settings);
/// assert_eq!(config.cache_header_name(), "X-Cache");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub expiration_secs: i64,
    pub cache_control: bool,
    pub cache_header: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiration_secs: DEFAULT_EXPIRATION.as_secs() as i64,
            cache_control: false,
            cache_header: DEFAULT_CACHE_HEADER.to_owned(),
        }
    }
}

impl CacheSettings {
    /// Parses settings from a JSON document. Missing fields take their defaults;
    /// unknown fields are rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The configured lifetime; non-positive values map to [`Duration::ZERO`].
    pub fn expiration(&self) -> Duration {
        u64::try_from(self.expiration_secs)
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }
}
