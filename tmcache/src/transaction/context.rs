use super::core::{TransactionId, TransactionState, UndoAction};
use super::lock::TmLock;
use indexmap::IndexMap;
use std::fmt::{Debug, Formatter};

/// Per-transaction state: the locks acquired so far and the undo log.
///
/// # Purpose
/// A `TransactionContext` is what gives a sequence of cache operations
/// atomicity and isolation. Every lock acquired through it stays held until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback); every mutation
/// records a compensating action first, so rollback can restore the prior
/// state by replaying the log back to front.
///
/// # Characteristics
/// - **Explicit**: passed by `&mut` into every lock and cache operation, never
///   shared between threads
/// - **Reusable**: empty again after commit or rollback, ready for the next
///   logical transaction under the same id
/// - **Self-cleaning**: dropping a context that still holds locks or undo
///   entries rolls it back
///
/// # Usage
/// ```rust
/// use tmcache::transaction::TransactionContext;
/// use tmcache::TransactionalCache;
///
/// let cache: TransactionalCache<String, i32> = TransactionalCache::new(4).unwrap();
/// let mut ctx = TransactionContext::new();
///
/// cache.put(&mut ctx, "a".to_string(), 1).unwrap();
/// ctx.rollback();
/// assert!(cache.get(&mut ctx, &"a".to_string()).unwrap().is_none());
/// ctx.commit();
/// ```
pub struct TransactionContext {
    id: TransactionId,
    state: TransactionState,
    undo_log: Vec<UndoAction>,
    locks: IndexMap<u64, TmLock>,
}

impl TransactionContext {
    /// Creates an empty, active context with a fresh id.
    pub fn new() -> Self {
        TransactionContext {
            id: TransactionId::new(),
            state: TransactionState::Active,
            undo_log: Vec::new(),
            locks: IndexMap::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Appends a compensating action to the undo log.
    ///
    /// Must be called before the mutation it compensates for is applied.
    pub fn record_undo<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state = TransactionState::Active;
        self.undo_log.push(Box::new(action));
    }

    /// Releases every held lock and discards the undo log without running it.
    pub fn commit(&mut self) {
        let discarded = self.undo_log.len();
        self.undo_log.clear();
        let released = self.release_locks();
        self.state = TransactionState::Committed;
        log::debug!(
            "Transaction {} committed ({} undo entries discarded, {} locks released)",
            self.id,
            discarded,
            released
        );
    }

    /// Replays the undo log newest first, then releases every held lock.
    pub fn rollback(&mut self) {
        let undone = self.undo_log.len();
        while let Some(action) = self.undo_log.pop() {
            action();
        }
        let released = self.release_locks();
        self.state = TransactionState::Aborted;
        log::debug!(
            "Transaction {} rolled back ({} undo entries replayed, {} locks released)",
            self.id,
            undone,
            released
        );
    }

    /// Number of undo entries recorded since the last commit or rollback.
    pub fn pending_undo(&self) -> usize {
        self.undo_log.len()
    }

    /// Number of distinct locks currently held.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    /// Returns `true` when the context holds no locks and no undo entries.
    pub fn is_empty(&self) -> bool {
        self.undo_log.is_empty() && self.locks.is_empty()
    }

    pub(crate) fn register_lock(&mut self, lock: &TmLock) {
        self.state = TransactionState::Active;
        self.locks.entry(lock.id()).or_insert_with(|| lock.clone());
    }

    pub(crate) fn forget_lock(&mut self, lock: &TmLock) {
        self.locks.shift_remove(&lock.id());
    }

    fn release_locks(&mut self) -> usize {
        let count = self.locks.len();
        for (_, lock) in self.locks.drain(..).rev() {
            lock.release_for(self.id);
        }
        count
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!(
                "Transaction {} dropped with {} locks and {} undo entries, rolling back",
                self.id,
                self.locks.len(),
                self.undo_log.len()
            );
            self.rollback();
        }
    }
}

impl Debug for TransactionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_undo", &self.undo_log.len())
            .field("held_locks", &self.locks.len())
            .finish()
    }
}

/// Commits `ctx`: releases its locks and discards its undo log.
pub fn commit(ctx: &mut TransactionContext) {
    ctx.commit()
}

/// Rolls `ctx` back: replays its undo log in reverse, then releases its locks.
pub fn rollback(ctx: &mut TransactionContext) {
    ctx.rollback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_new_context_is_empty_and_active() {
        let ctx = TransactionContext::new();
        assert!(ctx.is_empty());
        assert_eq!(ctx.state(), TransactionState::Active);
        assert_eq!(ctx.pending_undo(), 0);
        assert_eq!(ctx.held_locks(), 0);
    }

    #[test]
    fn test_rollback_replays_in_reverse_order() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();

        for i in 0..3 {
            let trail = Arc::clone(&trail);
            ctx.record_undo(move || trail.lock().push(i));
        }
        assert_eq!(ctx.pending_undo(), 3);

        ctx.rollback();
        assert_eq!(*trail.lock(), vec![2, 1, 0]);
        assert_eq!(ctx.state(), TransactionState::Aborted);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_commit_discards_undo_log() {
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = TransactionContext::new();
        let trail_clone = Arc::clone(&trail);
        ctx.record_undo(move || trail_clone.lock().push(1));

        ctx.commit();
        assert_eq!(ctx.state(), TransactionState::Committed);
        assert!(ctx.is_empty());

        // nothing left to undo
        ctx.rollback();
        assert!(trail.lock().is_empty());
    }

    #[test]
    fn test_commit_releases_locks() {
        let first = TmLock::new();
        let second = TmLock::new();
        let mut ctx = TransactionContext::new();

        assert!(first.acquire_write(&mut ctx).is_acquired());
        assert!(second.acquire_read(&mut ctx).is_acquired());
        assert!(second.acquire_read(&mut ctx).is_acquired());
        assert_eq!(ctx.held_locks(), 2);

        commit(&mut ctx);
        assert!(!first.is_locked());
        assert!(!second.is_locked());
        assert_eq!(ctx.held_locks(), 0);
    }

    #[test]
    fn test_rollback_releases_locks() {
        let lock = TmLock::new();
        let mut ctx = TransactionContext::new();
        assert!(lock.acquire_write(&mut ctx).is_acquired());

        rollback(&mut ctx);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_context_is_reusable() {
        let lock = TmLock::new();
        let mut ctx = TransactionContext::new();
        let id = ctx.id();

        assert!(lock.acquire_write(&mut ctx).is_acquired());
        ctx.commit();
        assert!(lock.acquire_write(&mut ctx).is_acquired());
        assert_eq!(ctx.state(), TransactionState::Active);
        assert_eq!(ctx.id(), id);
        ctx.commit();
    }

    #[test]
    fn test_drop_rolls_back() {
        let lock = TmLock::new();
        let trail = Arc::new(Mutex::new(Vec::new()));
        {
            let mut ctx = TransactionContext::new();
            assert!(lock.acquire_write(&mut ctx).is_acquired());
            let trail = Arc::clone(&trail);
            ctx.record_undo(move || trail.lock().push("undone"));
        }
        assert_eq!(*trail.lock(), vec!["undone"]);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_context_debug() {
        let ctx = TransactionContext::new();
        let debug_str = format!("{:?}", ctx);
        assert!(debug_str.contains("TransactionContext"));
        assert!(debug_str.contains("pending_undo: 0"));
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TransactionContext>();
    }
}
