use crate::errors::{CacheError, CacheResult, ErrorKind};
use crate::get_cpu_count;
use crate::transaction::DEFAULT_LOCK_TIMEOUT;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Shards allotted per available CPU when no shard count is configured.
pub const SHARDS_PER_CPU: usize = 4;

/// Configuration of a [`TransactionalCache`](super::TransactionalCache).
///
/// # Fields
/// - `shard_count` - number of independently locked partitions, fixed for the
///   cache's lifetime
/// - `lock_timeout` - retry window of every shard lock
/// - `retained_per_shard` - how many values each shard keeps strongly
///   reachable; `None` keeps every value until it is evicted
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheConfig {
    shard_count: usize,
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    lock_timeout: Duration,
    retained_per_shard: Option<NonZeroUsize>,
}

impl CacheConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        CacheConfig {
            shard_count: (get_cpu_count() * SHARDS_PER_CPU).max(1),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retained_per_shard: None,
        }
    }

    /// Starts a [`CacheBuilder`] seeded with the defaults.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn retained_per_shard(&self) -> Option<NonZeroUsize> {
        self.retained_per_shard
    }

    /// Checks every field, as a deserialized configuration bypasses the builder.
    pub fn validate(&self) -> CacheResult<()> {
        if self.shard_count == 0 {
            return Err(CacheError::new(
                "Shard count must be at least 1",
                ErrorKind::InvalidConfiguration,
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(CacheError::new(
                "Lock timeout must be greater than zero",
                ErrorKind::InvalidConfiguration,
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for [`CacheConfig`].
///
/// The first invalid setting is captured and returned from
/// [`build`](Self::build); later setters are ignored once an error is held.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tmcache::cache::CacheConfig;
///
/// let config = CacheConfig::builder()
///     .shard_count(8)
///     .lock_timeout(Duration::from_millis(250))
///     .retained_per_shard(1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.shard_count(), 8);
///
/// assert!(CacheConfig::builder().shard_count(0).build().is_err());
/// ```
#[derive(Default)]
pub struct CacheBuilder {
    error: Option<CacheError>,
    config: CacheConfig,
}

impl CacheBuilder {
    pub fn new() -> Self {
        CacheBuilder {
            error: None,
            config: CacheConfig::new(),
        }
    }

    /// Sets the number of shards. Must be at least 1.
    pub fn shard_count(mut self, shard_count: usize) -> Self {
        if self.error.is_none() {
            if shard_count == 0 {
                self.error = Some(CacheError::new(
                    "Shard count must be at least 1",
                    ErrorKind::InvalidConfiguration,
                ));
            } else {
                self.config.shard_count = shard_count;
            }
        }
        self
    }

    /// Sets the retry window of every shard lock. Must be non-zero.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        if self.error.is_none() {
            if timeout.is_zero() {
                self.error = Some(CacheError::new(
                    "Lock timeout must be greater than zero",
                    ErrorKind::InvalidConfiguration,
                ));
            } else {
                self.config.lock_timeout = timeout;
            }
        }
        self
    }

    /// Bounds the number of values each shard keeps strongly reachable.
    pub fn retained_per_shard(mut self, retained: usize) -> Self {
        if self.error.is_none() {
            match NonZeroUsize::new(retained) {
                Some(retained) => self.config.retained_per_shard = Some(retained),
                None => {
                    self.error = Some(CacheError::new(
                        "Retained values per shard must be at least 1",
                        ErrorKind::InvalidConfiguration,
                    ))
                }
            }
        }
        self
    }

    /// Keeps every value until it is evicted. This is the default.
    pub fn unbounded_retention(mut self) -> Self {
        self.config.retained_per_shard = None;
        self
    }

    pub fn build(self) -> CacheResult<CacheConfig> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.config),
        }
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
