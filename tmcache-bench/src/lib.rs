//! tmcache Benchmark Library
//!
//! Shared setup for the cache, transaction and concurrency benchmarks.

pub mod data_gen;

use std::time::Duration;
use tmcache::{CacheConfig, CacheResult, TransactionalCache};

pub type BenchCache = TransactionalCache<String, u64>;

/// Initializes logging once; set `RUST_LOG` to see lock diagnostics.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a cache with `shard_count` shards and a generous lock timeout.
pub fn create_cache(shard_count: usize) -> CacheResult<BenchCache> {
    let config = CacheConfig::builder()
        .shard_count(shard_count)
        .lock_timeout(Duration::from_secs(30))
        .build()?;
    log::debug!("Created bench cache with {} shards", shard_count);
    TransactionalCache::with_config(config)
}
