//! # tmcache - Transactional In-Memory Cache
//!
//! A concurrent in-memory key/value cache whose operations run inside
//! transactions. Each transaction takes read or write locks on the shards it
//! touches and keeps them until it commits or rolls back; every mutation is
//! recorded in an undo log so a rollback restores the previous state.
//!
//! ## Key Features
//!
//! - **Strict two-phase locking**: locks are held until commit or rollback
//! - **Upgradeable locks**: a reader may become the writer when no other
//!   writer got in between
//! - **Deadlock detection**: a global wait-for graph refuses acquisitions that
//!   would close a cycle
//! - **Bounded waits**: every acquisition gives up after the lock timeout
//! - **Sharding**: keys are spread over independently locked partitions
//! - **Grouped invalidation**: evictor registries drop related keys together
//!
//! ## Quick Start
//!
//! ```rust
//! use tmcache::transaction::TransactionContext;
//! use tmcache::TransactionalCache;
//!
//! let cache: TransactionalCache<String, String> = TransactionalCache::new(4).unwrap();
//! let mut ctx = TransactionContext::new();
//!
//! cache.put(&mut ctx, "greeting".to_string(), "hello".to_string()).unwrap();
//! ctx.commit();
//!
//! cache.evict(&mut ctx, &"greeting".to_string()).unwrap();
//! ctx.rollback();
//!
//! let value = cache.get(&mut ctx, &"greeting".to_string()).unwrap();
//! assert_eq!(value.as_deref().map(String::as_str), Some("hello"));
//! ctx.commit();
//! ```
//!
//! ## Module Organization
//!
//! - [`transaction`] - transaction contexts, transactional locks and the
//!   wait-for registry
//! - [`cache`] - the [`Cache`] interface and the sharded
//!   [`TransactionalCache`]
//! - [`invalidation`] - evictor registries
//! - [`errors`] - error types and result definitions

pub mod cache;
pub mod errors;
pub mod invalidation;
pub mod transaction;

pub use cache::{Cache, CacheBuilder, CacheConfig, CacheSession, TransactionalCache};
pub use errors::{CacheError, CacheResult, ErrorKind};
pub use transaction::{LockOutcome, TmLock, TransactionContext};

use std::thread::available_parallelism;

/// Returns the number of CPUs available to this process.
///
/// Falls back to 1 when the parallelism cannot be determined.
///
/// ```rust
/// use tmcache::get_cpu_count;
///
/// assert!(get_cpu_count() > 0);
/// ```
pub fn get_cpu_count() -> usize {
    available_parallelism()
        .map(|p| p.get())
        .unwrap_or_else(|err| {
            log::warn!("Failed to detect available parallelism: {}. Defaulting to 1.", err);
            1
        })
}
