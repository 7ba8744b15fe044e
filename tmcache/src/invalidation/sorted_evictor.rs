use crate::cache::Cache;
use crate::errors::CacheResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;
use std::ops::Bound;
use std::sync::Arc;

/// Cache keys registered under an ordered value, evicted by range.
///
/// Useful when cached entries derive from something with a natural order,
/// such as a version or a timestamp: everything above or below a threshold
/// can be invalidated in one call. Several keys may share one ordinal.
///
/// Like [`Evictor`](super::Evictor), the registry mutex is never held while
/// the cache is called, and keys are forgotten only once the whole batch has
/// been evicted.
pub struct SortedEvictor<O, K> {
    keys: Mutex<BTreeMap<O, HashSet<K>>>,
}

impl<O, K> SortedEvictor<O, K>
where
    O: Ord + Clone,
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        SortedEvictor {
            keys: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, ordinal: O, key: K) {
        self.keys.lock().entry(ordinal).or_default().insert(key);
    }

    /// Total number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.lock().values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Evicts keys whose ordinal is greater than `from`, or equal when
    /// `inclusive`.
    pub fn evict_above<V, C>(&self, from: O, inclusive: bool, cache: &mut C) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        self.evict_range((bound(from, inclusive), Bound::Unbounded), cache)
    }

    /// Evicts keys whose ordinal is less than `to`, or equal when `inclusive`.
    pub fn evict_below<V, C>(&self, to: O, inclusive: bool, cache: &mut C) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        self.evict_range((Bound::Unbounded, bound(to, inclusive)), cache)
    }

    /// Evicts keys whose ordinal lies between `from` and `to`. An empty or
    /// inverted range evicts nothing.
    pub fn evict_between<V, C>(
        &self,
        from: O,
        from_inclusive: bool,
        to: O,
        to_inclusive: bool,
        cache: &mut C,
    ) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        if from > to || (from == to && !(from_inclusive && to_inclusive)) {
            return Ok(0);
        }
        self.evict_range((bound(from, from_inclusive), bound(to, to_inclusive)), cache)
    }

    fn evict_range<V, C>(&self, range: (Bound<O>, Bound<O>), cache: &mut C) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        let batch: Vec<(O, K)> = {
            let keys = self.keys.lock();
            keys.range(range)
                .flat_map(|(ordinal, set)| set.iter().map(move |key| (ordinal.clone(), key.clone())))
                .collect()
        };

        for (_, key) in &batch {
            cache.evict(key)?;
        }

        let mut keys = self.keys.lock();
        for (ordinal, key) in &batch {
            if let Some(set) = keys.get_mut(ordinal) {
                set.remove(key);
                if set.is_empty() {
                    keys.remove(ordinal);
                }
            }
        }
        log::debug!("Evicted {} keys by range", batch.len());
        Ok(batch.len())
    }
}

impl<O, K> Default for SortedEvictor<O, K>
where
    O: Ord + Clone,
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

fn bound<O>(value: O, inclusive: bool) -> Bound<O> {
    if inclusive {
        Bound::Included(value)
    } else {
        Bound::Excluded(value)
    }
}

/// Associates ids with [`SortedEvictor`]s.
pub struct SortedEvictorMap<Id, O, K> {
    evictors: DashMap<Id, Arc<SortedEvictor<O, K>>>,
}

impl<Id, O, K> SortedEvictorMap<Id, O, K>
where
    Id: Hash + Eq,
    O: Ord + Clone,
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        SortedEvictorMap {
            evictors: DashMap::new(),
        }
    }

    pub fn register(&self, id: Id, ordinal: O, key: K) {
        self.evictors.entry(id).or_default().register(ordinal, key);
    }

    /// Number of keys registered under `id`.
    pub fn registered(&self, id: &Id) -> usize {
        self.evictors.get(id).map_or(0, |evictor| evictor.len())
    }

    pub fn evict_above<V, C>(
        &self,
        id: &Id,
        from: O,
        inclusive: bool,
        cache: &mut C,
    ) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        match self.evictor(id) {
            Some(evictor) => evictor.evict_above(from, inclusive, cache),
            None => Ok(0),
        }
    }

    pub fn evict_below<V, C>(
        &self,
        id: &Id,
        to: O,
        inclusive: bool,
        cache: &mut C,
    ) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        match self.evictor(id) {
            Some(evictor) => evictor.evict_below(to, inclusive, cache),
            None => Ok(0),
        }
    }

    pub fn evict_between<V, C>(
        &self,
        id: &Id,
        from: O,
        from_inclusive: bool,
        to: O,
        to_inclusive: bool,
        cache: &mut C,
    ) -> CacheResult<usize>
    where
        C: Cache<K, V> + ?Sized,
    {
        match self.evictor(id) {
            Some(evictor) => evictor.evict_between(from, from_inclusive, to, to_inclusive, cache),
            None => Ok(0),
        }
    }

    fn evictor(&self, id: &Id) -> Option<Arc<SortedEvictor<O, K>>> {
        // clone out so the dashmap shard guard is not held across evictions
        self.evictors.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

impl<Id, O, K> Default for SortedEvictorMap<Id, O, K>
where
    Id: Hash + Eq,
    O: Ord + Clone,
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
