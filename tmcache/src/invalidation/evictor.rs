use crate::cache::Cache;
use crate::errors::CacheResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

/// A set of cache keys that are invalidated together.
///
/// Keys are collected with [`register`](Self::register) and evicted in one
/// batch with [`evict`](Self::evict). The set's own mutex is never held while
/// calling into the cache, so registering from inside a transaction cannot
/// block behind a long-running eviction.
///
/// # Examples
///
/// ```rust
/// use tmcache::cache::Cache;
/// use tmcache::invalidation::Evictor;
/// use tmcache::transaction::TransactionContext;
/// use tmcache::TransactionalCache;
///
/// let cache: TransactionalCache<&str, i32> = TransactionalCache::new(2).unwrap();
/// let mut ctx = TransactionContext::new();
/// let mut session = cache.session(&mut ctx);
/// session.put("user:1", 1).unwrap();
/// session.put("user:2", 2).unwrap();
///
/// let evictor = Evictor::new();
/// evictor.register("user:1");
/// evictor.register("user:2");
/// assert_eq!(evictor.evict(&mut session).unwrap(), 2);
/// assert!(session.get(&"user:1").unwrap().is_none());
/// session.commit();
/// ```
pub struct Evictor<K> {
    keys: Mutex<HashSet<K>>,
}

impl<K> Evictor<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Evictor {
            keys: Mutex::new(HashSet::new()),
        }
    }

    pub fn register(&self, key: K) {
        self.keys.lock().insert(key);
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Evicts every registered key from `cache` and forgets them.
    ///
    /// On a lock failure the keys stay registered and the error is returned;
    /// the caller rolls back and may evict again later.
    pub fn evict<V, C>(&self, cache: &mut C) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        let batch: Vec<K> = self.keys.lock().iter().cloned().collect();
        for key in &batch {
            cache.evict(key)?;
        }

        let mut keys = self.keys.lock();
        for key in &batch {
            keys.remove(key);
        }
        log::debug!("Evicted {} registered keys", batch.len());
        Ok(batch.len())
    }
}

impl<K> Default for Evictor<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Associates ids with [`Evictor`]s.
///
/// Typical use: register every cache key derived from an entity under the
/// entity's id, then invalidate all of them when the entity changes.
pub struct EvictorMap<Id, K> {
    evictors: DashMap<Id, Arc<Evictor<K>>>,
}

impl<Id, K> EvictorMap<Id, K>
where
    Id: Hash + Eq,
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        EvictorMap {
            evictors: DashMap::new(),
        }
    }

    pub fn register(&self, id: Id, key: K) {
        self.evictors.entry(id).or_default().register(key);
    }

    /// Number of keys registered under `id`.
    pub fn registered(&self, id: &Id) -> usize {
        self.evictors.get(id).map_or(0, |evictor| evictor.len())
    }

    /// Evicts every key registered under `id`. Unknown ids evict nothing.
    pub fn evict<V, C>(&self, id: &Id, cache: &mut C) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        let evictor = self.evictors.get(id).map(|entry| Arc::clone(entry.value()));
        match evictor {
            Some(evictor) => evictor.evict(cache),
            None => Ok(0),
        }
    }
}

impl<Id, K> Default for EvictorMap<Id, K>
where
    Id: Hash + Eq,
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TransactionalCache;
    use crate::errors::{CacheError, ErrorKind};
    use crate::transaction::TransactionContext;
    use std::collections::HashMap;

    /// Plain map-backed cache that fails evictions of one poisoned key.
    #[derive(Default)]
    struct MapCache {
        map: HashMap<String, Arc<i32>>,
        poisoned: Option<String>,
    }

    impl Cache<String, i32> for MapCache {
        fn put(&mut self, key: String, value: i32) -> CacheResult<()> {
            self.map.insert(key, Arc::new(value));
            Ok(())
        }

        fn get(&mut self, key: &String) -> CacheResult<Option<Arc<i32>>> {
            Ok(self.map.get(key).cloned())
        }

        fn evict(&mut self, key: &String) -> CacheResult<()> {
            if self.poisoned.as_ref() == Some(key) {
                return Err(CacheError::new("poisoned", ErrorKind::LockTimeout));
            }
            self.map.remove(key);
            Ok(())
        }
    }

    #[test]
    fn test_evictor_evicts_and_clears() {
        let mut cache = MapCache::default();
        cache.put("a".into(), 1).unwrap();
        cache.put("b".into(), 2).unwrap();
        cache.put("c".into(), 3).unwrap();

        let evictor = Evictor::new();
        evictor.register("a".to_string());
        evictor.register("b".to_string());
        evictor.register("a".to_string());
        assert_eq!(evictor.len(), 2);

        assert_eq!(evictor.evict(&mut cache).unwrap(), 2);
        assert!(evictor.is_empty());
        assert!(cache.get(&"a".into()).unwrap().is_none());
        assert!(cache.get(&"b".into()).unwrap().is_none());
        assert!(cache.get(&"c".into()).unwrap().is_some());
    }

    #[test]
    fn test_evictor_keeps_keys_on_failure() {
        let mut cache = MapCache {
            poisoned: Some("b".to_string()),
            ..Default::default()
        };
        let evictor = Evictor::new();
        evictor.register("a".to_string());
        evictor.register("b".to_string());

        let err = evictor.evict(&mut cache).unwrap_err();
        assert!(err.is_lock_failure());
        assert_eq!(evictor.len(), 2);

        cache.poisoned = None;
        assert_eq!(evictor.evict(&mut cache).unwrap(), 2);
    }

    #[test]
    fn test_evictor_map_isolates_ids() {
        let mut cache = MapCache::default();
        cache.put("u1:profile".into(), 1).unwrap();
        cache.put("u1:feed".into(), 2).unwrap();
        cache.put("u2:profile".into(), 3).unwrap();

        let map = EvictorMap::new();
        map.register(1, "u1:profile".to_string());
        map.register(1, "u1:feed".to_string());
        map.register(2, "u2:profile".to_string());
        assert_eq!(map.registered(&1), 2);

        assert_eq!(map.evict(&1, &mut cache).unwrap(), 2);
        assert_eq!(map.registered(&1), 0);
        assert_eq!(map.registered(&2), 1);
        assert!(cache.get(&"u2:profile".into()).unwrap().is_some());
        assert_eq!(map.evict(&42, &mut cache).unwrap(), 0);
    }

    #[test]
    fn test_eviction_through_session_rolls_back() {
        let cache: TransactionalCache<String, i32> = TransactionalCache::new(4).unwrap();
        let mut ctx = TransactionContext::new();
        cache.put(&mut ctx, "a".to_string(), 1).unwrap();
        ctx.commit();

        let evictor = Evictor::new();
        evictor.register("a".to_string());
        {
            let mut session = cache.session(&mut ctx);
            evictor.evict(&mut session).unwrap();
            assert!(session.get(&"a".to_string()).unwrap().is_none());
            session.rollback();
        }

        assert_eq!(cache.get(&mut ctx, &"a".to_string()).unwrap().as_deref(), Some(&1));
        ctx.commit();
        assert!(evictor.is_empty());
    }
}
