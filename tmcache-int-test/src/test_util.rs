use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};
use tmcache::errors::{CacheError, CacheResult, ErrorKind};
use tmcache::transaction::TransactionContext;
use tmcache::{CacheConfig, TransactionalCache};

pub type TestCache = TransactionalCache<String, i64>;

/// Runs a test with retry logic and error handling.
///
/// `before` builds a fresh [`TestContext`] for every attempt, `after` runs
/// whether or not the test body succeeded.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> CacheResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> CacheResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> CacheResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx)
                        .map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();
        let failure = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => {
                if !bt.is_empty() && !bt.contains("disabled") {
                    format!("{}\n{}", e, bt)
                } else {
                    e
                }
            }
            Err(panic_err) => {
                if let Some(s) = panic_err.downcast_ref::<&str>() {
                    format!("Panic: {}", s)
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    format!("Panic: {}", s)
                } else {
                    "Panic: unknown payload".to_string()
                }
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("{}", failure);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(failure);
    }

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

#[derive(Clone)]
pub struct TestContext {
    cache: TestCache,
}

impl TestContext {
    pub fn new(cache: TestCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> TestCache {
        self.cache.clone()
    }
}

/// A cache with eight shards and a two second lock timeout.
pub fn create_test_context() -> CacheResult<TestContext> {
    create_test_context_with(8, Duration::from_secs(2))
}

pub fn create_test_context_with(shard_count: usize, lock_timeout: Duration) -> CacheResult<TestContext> {
    let config = CacheConfig::builder()
        .shard_count(shard_count)
        .lock_timeout(lock_timeout)
        .build()?;
    Ok(TestContext::new(TransactionalCache::with_config(config)?))
}

/// Like [`create_test_context`], but each shard keeps at most `retained`
/// values alive on its own.
pub fn create_bounded_test_context(retained: usize) -> CacheResult<TestContext> {
    let config = CacheConfig::builder()
        .shard_count(8)
        .lock_timeout(Duration::from_secs(2))
        .retained_per_shard(retained)
        .build()?;
    Ok(TestContext::new(TransactionalCache::with_config(config)?))
}

/// Drops everything reclaimable and checks no shard was left locked.
pub fn cleanup(ctx: TestContext) -> CacheResult<()> {
    let cache = ctx.cache();
    let mut txn = TransactionContext::new();
    cache.purge(&mut txn)?;
    txn.commit();

    for i in 0..cache.shard_count() {
        let key = key_on_shard(&cache, i)?;
        if cache.shard_lock(&key).is_locked() {
            return Err(CacheError::new(
                &format!("Shard {} still locked after test", i),
                ErrorKind::InvalidOperation,
            ));
        }
    }
    Ok(())
}

/// Returns `count` keys, each mapped to a different shard.
pub fn keys_on_distinct_shards(cache: &TestCache, count: usize) -> CacheResult<Vec<String>> {
    if count > cache.shard_count() {
        return Err(CacheError::new(
            "More keys requested than shards available",
            ErrorKind::InvalidOperation,
        ));
    }

    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(count);
    let mut i = 0usize;
    while keys.len() < count {
        let key = format!("key-{}", i);
        if seen.insert(cache.shard_index(&key)) {
            keys.push(key);
        }
        i += 1;
    }
    Ok(keys)
}

/// Returns a key mapped to shard `index`.
pub fn key_on_shard(cache: &TestCache, index: usize) -> CacheResult<String> {
    (0..100_000)
        .map(|i| format!("shard-key-{}", i))
        .find(|key| cache.shard_index(key) == index)
        .ok_or_else(|| CacheError::new("No key found for shard", ErrorKind::InternalError))
}

/// Reads `keys` in a transaction of its own and commits it.
pub fn snapshot(cache: &TestCache, keys: &[String]) -> CacheResult<BTreeMap<String, Option<i64>>> {
    let mut txn = TransactionContext::new();
    let mut view = BTreeMap::new();
    for key in keys {
        let value = cache.get(&mut txn, key)?;
        view.insert(key.clone(), value.map(|v| *v));
    }
    txn.commit();
    Ok(view)
}
