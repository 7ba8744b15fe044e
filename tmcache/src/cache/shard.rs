use crate::transaction::TmLock;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One independently locked partition of the cache.
///
/// The [`TmLock`] provides transactional isolation. The inner mutex only
/// guards memory access to [`ShardData`] for the duration of a single
/// operation or undo action and is never held across calls.
pub(crate) struct Shard<K, V> {
    lock: TmLock,
    data: Arc<Mutex<ShardData<K, V>>>,
}

impl<K, V> Shard<K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(lock_timeout: Duration, retained: Option<NonZeroUsize>) -> Self {
        Shard {
            lock: TmLock::with_timeout(lock_timeout),
            data: Arc::new(Mutex::new(ShardData::new(retained))),
        }
    }

    pub(crate) fn lock(&self) -> &TmLock {
        &self.lock
    }

    pub(crate) fn data(&self) -> &Arc<Mutex<ShardData<K, V>>> {
        &self.data
    }
}

/// Key to value mapping of a shard.
///
/// Entries hold values weakly. A bounded LRU of strong references keeps the
/// most recently used values alive; a value displaced from it survives only
/// while some caller still holds the `Arc` returned by a lookup. Displaced
/// keys go onto the reclamation queue and are dropped from the mapping by
/// [`purge`](Self::purge) once their value is gone.
///
/// Only [`insert`](Self::insert) displaces. Lookups and restores may push
/// the LRU past its bound; the next insert trims it back.
pub(crate) struct ShardData<K, V> {
    entries: HashMap<K, Weak<V>>,
    retained: LruCache<K, Arc<V>>,
    bound: Option<NonZeroUsize>,
    reclaimed: VecDeque<K>,
}

impl<K, V> ShardData<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new(retained: Option<NonZeroUsize>) -> Self {
        ShardData {
            entries: HashMap::new(),
            retained: match retained {
                Some(capacity) => LruCache::new(capacity),
                None => LruCache::unbounded(),
            },
            bound: retained,
            reclaimed: VecDeque::new(),
        }
    }

    /// Live value for `key`, marking it most recently used.
    pub(crate) fn lookup(&mut self, key: &K) -> Option<Arc<V>> {
        let value = self.entries.get(key)?.upgrade()?;
        if self.retained.get(key).is_none() {
            // still referenced elsewhere, take it back under retention
            self.retain_over_bound(key.clone(), Arc::clone(&value));
        }
        Some(value)
    }

    /// Live value for `key` without touching recency.
    pub(crate) fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key)?.upgrade()
    }

    /// Frees a retention slot for `key`.
    ///
    /// Returns the values pushed out of retention together with their keys.
    /// They stay reachable for as long as the caller holds them.
    pub(crate) fn make_room(&mut self, key: &K) -> Vec<(K, Arc<V>)> {
        let mut displaced = Vec::new();
        let Some(bound) = self.bound else {
            return displaced;
        };
        self.retained.pop(key);
        while self.retained.len() >= bound.get() {
            let Some((other, value)) = self.retained.pop_lru() else {
                break;
            };
            self.reclaimed.push_back(other.clone());
            displaced.push((other, value));
        }
        if self.retained.cap() != bound {
            self.retained.resize(bound);
        }
        displaced
    }

    /// Maps `key` to `value`, returning whatever retention had to give up.
    pub(crate) fn insert(&mut self, key: K, value: Arc<V>) -> Vec<(K, Arc<V>)> {
        let displaced = self.make_room(&key);
        self.entries.insert(key.clone(), Arc::downgrade(&value));
        self.retained.push(key, value);
        displaced
    }

    /// Removes `key`, returning its live value.
    pub(crate) fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let previous = self.entries.remove(key).and_then(|weak| weak.upgrade());
        self.retained.pop(key);
        previous
    }

    /// Puts `key` back to a previously observed state without displacing
    /// any other value.
    pub(crate) fn restore(&mut self, key: K, previous: Option<Arc<V>>) {
        match previous {
            Some(value) => {
                self.entries.insert(key.clone(), Arc::downgrade(&value));
                self.retain_over_bound(key, value);
            }
            None => {
                self.remove(&key);
            }
        }
    }

    /// Takes values handed out by [`make_room`](Self::make_room) back under
    /// retention, skipping keys that have since been remapped or removed.
    pub(crate) fn reinstate(&mut self, displaced: Vec<(K, Arc<V>)>) {
        for (key, value) in displaced {
            let still_mapped = self
                .entries
                .get(&key)
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&value)));
            if still_mapped && !self.retained.contains(&key) {
                self.retain_over_bound(key, value);
            }
        }
    }

    /// Drains the reclamation queue, dropping entries whose value is gone.
    ///
    /// Keys whose value is still referenced outside the shard are queued
    /// again so they are looked at on a later purge.
    pub(crate) fn purge(&mut self) -> usize {
        let mut purged = 0;
        let mut still_alive = Vec::new();
        while let Some(key) = self.reclaimed.pop_front() {
            if self.retained.contains(&key) {
                continue;
            }
            match self.entries.get(&key) {
                Some(weak) if weak.strong_count() == 0 => {
                    self.entries.remove(&key);
                    purged += 1;
                }
                Some(_) => still_alive.push(key),
                None => {}
            }
        }
        self.reclaimed.extend(still_alive);
        purged
    }

    /// Number of entries whose value is still reachable.
    pub(crate) fn live_len(&self) -> usize {
        self.entries.values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub(crate) fn pending_reclamation(&self) -> usize {
        self.reclaimed.len()
    }

    fn retain_over_bound(&mut self, key: K, value: Arc<V>) {
        if self.retained.len() >= self.retained.cap().get() && !self.retained.contains(&key) {
            let grown = self.retained.cap().saturating_add(1);
            self.retained.resize(grown);
        }
        self.retained.push(key, value);
    }
}
