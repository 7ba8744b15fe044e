use super::context::TransactionContext;
use super::core::{LockMode, LockOutcome, TransactionId};
use super::wait_for::WaitForRegistry;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry window used when a lock is created without an explicit timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// An upgradeable, deadlock-detecting read/write lock.
///
/// Holds are owned by a [`TransactionContext`] rather than by a guard, so a
/// lock stays held across calls until the context commits or rolls back.
/// A context holds a lock in at most one mode: write subsumes read, and
/// asking for read twice is a no-op.
///
/// Acquisition first makes a single non-blocking attempt. On contention the
/// caller registers itself in the [`WaitForRegistry`], checks the wait-for
/// graph for a cycle back to itself and otherwise blocks until some lock
/// changes state, retrying until the lock's timeout elapses.
///
/// # Examples
///
/// ```rust
/// use tmcache::transaction::{LockOutcome, TmLock, TransactionContext};
///
/// let lock = TmLock::new();
/// let mut ctx = TransactionContext::new();
///
/// assert_eq!(lock.acquire_read(&mut ctx), LockOutcome::Acquired);
/// // upgrade in place
/// assert_eq!(lock.acquire_write(&mut ctx), LockOutcome::Acquired);
/// assert_eq!(lock.acquire_read(&mut ctx), LockOutcome::AlreadyHeld);
///
/// ctx.commit();
/// assert!(!lock.is_locked());
/// ```
#[derive(Clone)]
pub struct TmLock {
    inner: Arc<TmLockInner>,
}

struct TmLockInner {
    id: u64,
    timeout: Duration,
    state: Mutex<LockState>,
    contended_acquisitions: AtomicU64,
}

#[derive(Default)]
struct LockState {
    writer: Option<TransactionId>,
    readers: SmallVec<[TransactionId; 4]>,
    write_acquisitions: u64,
}

impl LockState {
    fn mode_of(&self, txn: TransactionId) -> Option<LockMode> {
        if self.writer == Some(txn) {
            Some(LockMode::Write)
        } else if self.readers.contains(&txn) {
            Some(LockMode::Read)
        } else {
            None
        }
    }
}

impl TmLock {
    /// Creates a lock with the default retry window.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates a lock that gives up acquisition attempts after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        TmLock {
            inner: Arc::new(TmLockInner {
                id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
                timeout,
                state: Mutex::new(LockState::default()),
                contended_acquisitions: AtomicU64::new(0),
            }),
        }
    }

    /// Process-unique id of this lock.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Acquires the lock in read mode for `ctx`.
    ///
    /// Returns [`LockOutcome::AlreadyHeld`] if the context already holds the
    /// lock in either mode.
    pub fn acquire_read(&self, ctx: &mut TransactionContext) -> LockOutcome {
        if self.held_by(ctx.id()).is_some() {
            return LockOutcome::AlreadyHeld;
        }
        self.acquire(ctx, LockMode::Read)
    }

    /// Acquires the lock in write mode for `ctx`, upgrading a read hold.
    ///
    /// An upgrade fully releases the read hold before competing for write
    /// mode. If another writer got in between, the upgrade reports
    /// [`LockOutcome::UpgradeFailed`] and the context is left holding nothing
    /// on this lock; the read hold is not restored.
    pub fn acquire_write(&self, ctx: &mut TransactionContext) -> LockOutcome {
        match self.held_by(ctx.id()) {
            Some(LockMode::Write) => LockOutcome::AlreadyHeld,
            Some(LockMode::Read) => self.upgrade(ctx),
            None => self.acquire(ctx, LockMode::Write),
        }
    }

    /// Releases whatever mode `ctx` holds on this lock and wakes waiters.
    pub fn release_all(&self, ctx: &mut TransactionContext) {
        ctx.forget_lock(self);
        self.release_for(ctx.id());
    }

    /// Mode in which `txn` currently holds this lock, if any.
    pub fn held_by(&self, txn: TransactionId) -> Option<LockMode> {
        self.inner.state.lock().mode_of(txn)
    }

    /// Snapshot of the transactions currently holding this lock.
    pub fn owners(&self) -> Vec<TransactionId> {
        let state = self.inner.state.lock();
        state.writer.iter().chain(state.readers.iter()).copied().collect()
    }

    pub fn is_locked(&self) -> bool {
        let state = self.inner.state.lock();
        state.writer.is_some() || !state.readers.is_empty()
    }

    /// Number of successful write-mode acquisitions over the lock's lifetime.
    pub fn write_acquisitions(&self) -> u64 {
        self.inner.state.lock().write_acquisitions
    }

    /// Number of acquisitions that could not take the fast path and had to wait.
    pub fn contended_acquisitions(&self) -> u64 {
        self.inner.contended_acquisitions.load(Ordering::Relaxed)
    }

    /// Single non-blocking acquisition attempt.
    pub(crate) fn try_acquire(&self, txn: TransactionId, mode: LockMode) -> bool {
        let mut state = self.inner.state.lock();
        match mode {
            LockMode::Read => {
                if state.writer.is_some() {
                    return false;
                }
                state.readers.push(txn);
                true
            }
            LockMode::Write => {
                if state.writer.is_some() || !state.readers.is_empty() {
                    return false;
                }
                state.writer = Some(txn);
                state.write_acquisitions += 1;
                true
            }
        }
    }

    /// Drops the hold of `txn` and signals waiters. Idempotent.
    pub(crate) fn release_for(&self, txn: TransactionId) -> Option<LockMode> {
        let released = {
            let mut state = self.inner.state.lock();
            match state.mode_of(txn) {
                Some(LockMode::Write) => {
                    state.writer = None;
                    Some(LockMode::Write)
                }
                Some(LockMode::Read) => {
                    state.readers.retain(|owner| *owner != txn);
                    Some(LockMode::Read)
                }
                None => None,
            }
        };

        if let Some(mode) = released {
            log::debug!("Transaction {} released {} lock #{}", txn, mode, self.id());
            WaitForRegistry::global().signal();
        }
        released
    }

    fn acquire(&self, ctx: &mut TransactionContext, mode: LockMode) -> LockOutcome {
        let txn = ctx.id();
        let outcome = if self.try_acquire(txn, mode) {
            LockOutcome::Acquired
        } else {
            self.inner.contended_acquisitions.fetch_add(1, Ordering::Relaxed);
            WaitForRegistry::global().block_until_acquired(txn, self, mode, self.timeout())
        };

        match outcome {
            LockOutcome::Acquired => {
                log::debug!("Transaction {} acquired {} lock #{}", txn, mode, self.id());
                ctx.register_lock(self);
            }
            LockOutcome::TimedOut => {
                log::warn!(
                    "Transaction {} timed out after {:?} waiting for {} lock #{}",
                    txn,
                    self.timeout(),
                    mode,
                    self.id()
                );
            }
            LockOutcome::DeadlockDetected => {
                log::warn!(
                    "Transaction {} deadlocked waiting for {} lock #{}",
                    txn,
                    mode,
                    self.id()
                );
            }
            LockOutcome::AlreadyHeld | LockOutcome::UpgradeFailed => {}
        }
        outcome
    }

    fn upgrade(&self, ctx: &mut TransactionContext) -> LockOutcome {
        // no writer can get in while we still hold read
        let initial_writes = self.write_acquisitions();
        self.release_all(ctx);

        match self.acquire(ctx, LockMode::Write) {
            LockOutcome::Acquired => {
                if self.write_acquisitions() == initial_writes + 1 {
                    log::debug!("Transaction {} upgraded lock #{}", ctx.id(), self.id());
                    LockOutcome::Acquired
                } else {
                    log::warn!(
                        "Transaction {} lost lock #{} to an intervening writer during upgrade",
                        ctx.id(),
                        self.id()
                    );
                    self.release_all(ctx);
                    LockOutcome::UpgradeFailed
                }
            }
            other => other,
        }
    }
}

impl Default for TmLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TmLock {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TmLock {}

impl Debug for TmLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TmLock")
            .field("id", &self.inner.id)
            .field("writer", &state.writer)
            .field("readers", &state.readers.len())
            .field("write_acquisitions", &state.write_acquisitions)
            .finish()
    }
}
