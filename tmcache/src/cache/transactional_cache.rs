use super::config::CacheConfig;
use super::shard::Shard;
use super::Cache;
use crate::errors::CacheResult;
use crate::transaction::{TmLock, TransactionContext};
use std::collections::hash_map::DefaultHasher;
use std::fmt::{Debug, Formatter};
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::Arc;

/// A key/value cache partitioned into independently locked shards, with
/// atomic, isolated and rollback-capable mutations.
///
/// # Purpose
/// Every operation takes the caller's [`TransactionContext`]. Reads take the
/// key's shard lock in read mode, writes take (or upgrade to) write mode and
/// record a compensating action before mutating. Locks stay held until the
/// context commits or rolls back, so a sequence of operations is isolated
/// from other transactions touching the same shards.
///
/// # Characteristics
/// - **Fixed sharding**: the shard count is set at construction and never
///   changes; a key always maps to the same shard
/// - **Shared handle**: clones share the same shards
/// - **Reclaimable values**: see [`CacheConfig::retained_per_shard`]
///
/// # Errors
/// Every locking operation can fail with a lock failure (timeout, deadlock or
/// failed upgrade). The context must then be rolled back.
///
/// # Examples
///
/// ```rust
/// use tmcache::transaction::TransactionContext;
/// use tmcache::TransactionalCache;
///
/// let cache: TransactionalCache<&str, i32> = TransactionalCache::new(4).unwrap();
///
/// let mut t1 = TransactionContext::new();
/// cache.put(&mut t1, "a", 1).unwrap();
/// cache.put(&mut t1, "b", 2).unwrap();
/// t1.commit();
///
/// let mut t2 = TransactionContext::new();
/// cache.put(&mut t2, "a", 99).unwrap();
/// t2.rollback();
///
/// assert_eq!(cache.get(&mut t2, &"a").unwrap().as_deref(), Some(&1));
/// t2.commit();
/// ```
pub struct TransactionalCache<K, V> {
    inner: Arc<TransactionalCacheInner<K, V>>,
}

struct TransactionalCacheInner<K, V> {
    shards: Box<[Shard<K, V>]>,
    hasher: BuildHasherDefault<DefaultHasher>,
    config: CacheConfig,
}

impl<K, V> TransactionalCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache with `shard_count` shards and default settings otherwise.
    pub fn new(shard_count: usize) -> CacheResult<Self> {
        let config = CacheConfig::builder().shard_count(shard_count).build()?;
        Self::with_config(config)
    }

    pub fn with_config(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let shards = (0..config.shard_count())
            .map(|_| Shard::new(config.lock_timeout(), config.retained_per_shard()))
            .collect();

        log::debug!(
            "Created transactional cache with {} shards (lock timeout {:?})",
            config.shard_count(),
            config.lock_timeout()
        );
        Ok(TransactionalCache {
            inner: Arc::new(TransactionalCacheInner {
                shards,
                hasher: BuildHasherDefault::default(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Index of the shard `key` belongs to.
    pub fn shard_index(&self, key: &K) -> usize {
        let hash = self.inner.hasher.hash_one(key);
        (hash % self.inner.shards.len() as u64) as usize
    }

    /// The lock guarding `key`'s shard.
    pub fn shard_lock(&self, key: &K) -> &TmLock {
        self.shard(key).lock()
    }

    /// Looks `key` up under a read lock on its shard.
    ///
    /// A value that has been reclaimed reads as absent. Records no undo entry.
    pub fn get(&self, ctx: &mut TransactionContext, key: &K) -> CacheResult<Option<Arc<V>>> {
        let shard = self.shard(key);
        shard.lock().acquire_read(ctx).into_result()?;
        let value = shard.data().lock().lookup(key);
        Ok(value)
    }

    /// Maps `key` to `value` under a write lock on its shard.
    ///
    /// Rolling back restores the previous value, or removes the key if it
    /// was absent. Values this put pushes out of a bounded retention stay
    /// reachable until the transaction ends, and a rollback retains them
    /// again.
    pub fn put(&self, ctx: &mut TransactionContext, key: K, value: V) -> CacheResult<()> {
        let shard = self.shard(&key);
        shard.lock().acquire_write(ctx).into_result()?;

        let mut data = shard.data().lock();
        data.purge();
        let previous = data.peek(&key);
        let displaced = data.make_room(&key);
        let undo_data = Arc::clone(shard.data());
        let undo_key = key.clone();
        ctx.record_undo(move || {
            let mut data = undo_data.lock();
            data.restore(undo_key, previous);
            data.reinstate(displaced);
        });
        data.insert(key, Arc::new(value));
        Ok(())
    }

    /// Removes `key` under a write lock on its shard.
    ///
    /// Evicting an absent key changes nothing and records no undo entry.
    pub fn evict(&self, ctx: &mut TransactionContext, key: &K) -> CacheResult<()> {
        let shard = self.shard(key);
        shard.lock().acquire_write(ctx).into_result()?;

        let mut data = shard.data().lock();
        data.purge();
        if let Some(previous) = data.peek(key) {
            let undo_data = Arc::clone(shard.data());
            let undo_key = key.clone();
            ctx.record_undo(move || undo_data.lock().restore(undo_key, Some(previous)));
            data.remove(key);
        }
        Ok(())
    }

    /// Takes the write lock of `key`'s shard without mutating anything.
    ///
    /// Lets a caller serialize a read-then-maybe-write sequence.
    pub fn write_lock(&self, ctx: &mut TransactionContext, key: &K) -> CacheResult<()> {
        self.shard(key).lock().acquire_write(ctx).into_result()
    }

    /// Write-locks every shard in index order and purges reclaimed entries.
    ///
    /// Returns the number of entries dropped.
    pub fn purge(&self, ctx: &mut TransactionContext) -> CacheResult<usize> {
        for shard in self.inner.shards.iter() {
            shard.lock().acquire_write(ctx).into_result()?;
        }

        let purged: usize = self
            .inner
            .shards
            .iter()
            .map(|shard| shard.data().lock().purge())
            .sum();
        log::trace!("Purged {} reclaimed entries", purged);
        Ok(purged)
    }

    /// Number of entries with a live value.
    ///
    /// Takes no transactional locks, so it may observe uncommitted writes.
    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.data().lock().live_len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Binds this cache to `ctx`, yielding a [`Cache`] implementation.
    pub fn session<'a>(&'a self, ctx: &'a mut TransactionContext) -> CacheSession<'a, K, V> {
        CacheSession { cache: self, ctx }
    }

    /// Commits `ctx`. Contexts are not tied to a cache, so this covers every
    /// cache the context touched.
    pub fn commit(ctx: &mut TransactionContext) {
        ctx.commit()
    }

    /// Rolls `ctx` back across every cache it touched.
    pub fn rollback(ctx: &mut TransactionContext) {
        ctx.rollback()
    }

    fn shard(&self, key: &K) -> &Shard<K, V> {
        &self.inner.shards[self.shard_index(key)]
    }
}

impl<K, V> Clone for TransactionalCache<K, V> {
    fn clone(&self) -> Self {
        TransactionalCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Debug for TransactionalCache<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalCache")
            .field("shard_count", &self.inner.shards.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// A [`TransactionalCache`] bound to one [`TransactionContext`].
///
/// Implements [`Cache`] so collaborators written against the plain cache
/// interface (such as the invalidation registries) can run inside a
/// transaction.
pub struct CacheSession<'a, K, V> {
    cache: &'a TransactionalCache<K, V>,
    ctx: &'a mut TransactionContext,
}

impl<K, V> CacheSession<'_, K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    pub fn context(&self) -> &TransactionContext {
        &*self.ctx
    }

    pub fn write_lock(&mut self, key: &K) -> CacheResult<()> {
        self.cache.write_lock(self.ctx, key)
    }

    pub fn purge(&mut self) -> CacheResult<usize> {
        self.cache.purge(self.ctx)
    }

    pub fn commit(&mut self) {
        self.ctx.commit()
    }

    pub fn rollback(&mut self) {
        self.ctx.rollback()
    }
}

impl<K, V> Cache<K, V> for CacheSession<'_, K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + Sync + 'static,
{
    fn put(&mut self, key: K, value: V) -> CacheResult<()> {
        self.cache.put(self.ctx, key, value)
    }

    fn get(&mut self, key: &K) -> CacheResult<Option<Arc<V>>> {
        self.cache.get(self.ctx, key)
    }

    fn evict(&mut self, key: &K) -> CacheResult<()> {
        self.cache.evict(self.ctx, key)
    }
}
