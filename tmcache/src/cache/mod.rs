//! Sharded transactional cache.
//!
//! - [`Cache`] - the plain key/value interface collaborators program against
//! - [`TransactionalCache`] - the sharded, lock-managed implementation
//! - [`CacheSession`] - a transactional cache bound to one context
//! - [`CacheConfig`] / [`CacheBuilder`] - construction settings

pub mod config;
mod shard;
pub mod transactional_cache;

pub use config::{CacheBuilder, CacheConfig};
pub use transactional_cache::{CacheSession, TransactionalCache};

use crate::errors::CacheResult;
use std::sync::Arc;

/// A key/value cache.
///
/// Implementations may or may not be transactional. Values are handed out as
/// shared `Arc`s; a value obtained from `get` stays readable by its holder
/// regardless of later evictions.
pub trait Cache<K, V> {
    /// Maps `key` to `value`, replacing any previous value.
    fn put(&mut self, key: K, value: V) -> CacheResult<()>;

    /// Returns the value mapped to `key`, if any.
    fn get(&mut self, key: &K) -> CacheResult<Option<Arc<V>>>;

    /// Removes `key`. Removing an absent key is a no-op.
    fn evict(&mut self, key: &K) -> CacheResult<()>;
}
