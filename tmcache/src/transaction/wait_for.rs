use super::core::{LockMode, LockOutcome, TransactionId};
use super::lock::TmLock;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static WAIT_FOR: LazyLock<WaitForRegistry> = LazyLock::new(WaitForRegistry::new);

/// Process-wide record of which transaction is blocked on which lock.
///
/// Together with each lock's owner set this forms the wait-for graph:
/// transaction -> awaited lock -> owning transactions -> ... A path that
/// leads back to the transaction it started from is a deadlock.
///
/// All mutations and every cycle check happen under one mutex so that the
/// graph is observed as a consistent snapshot. The mutex is only touched
/// once an acquisition has failed its fast path, and releases only signal
/// through it while somebody is actually waiting.
pub struct WaitForRegistry {
    graph: Mutex<WaitForGraph>,
    signal: Condvar,
    waiters: AtomicUsize,
}

#[derive(Default)]
struct WaitForGraph {
    waiting: HashMap<TransactionId, TmLock>,
}

impl WaitForGraph {
    /// Records that `txn` is waiting for `lock`, replacing any previous entry.
    fn set_waiting(&mut self, txn: TransactionId, lock: &TmLock) {
        self.waiting.insert(txn, lock.clone());
    }

    fn clear_waiting(&mut self, txn: TransactionId) {
        self.waiting.remove(&txn);
    }

    fn has_cycle(&self, origin: TransactionId) -> bool {
        let Some(start) = self.waiting.get(&origin) else {
            return false;
        };

        let mut visited = HashSet::new();
        let mut pending = vec![start.clone()];
        while let Some(lock) = pending.pop() {
            for owner in lock.owners() {
                if owner == origin {
                    return true;
                }
                if visited.insert(owner) {
                    if let Some(next) = self.waiting.get(&owner) {
                        pending.push(next.clone());
                    }
                }
            }
        }
        false
    }
}

impl WaitForRegistry {
    fn new() -> Self {
        WaitForRegistry {
            graph: Mutex::new(WaitForGraph::default()),
            signal: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// The registry shared by every lock in the process.
    pub fn global() -> &'static WaitForRegistry {
        &WAIT_FOR
    }

    /// The lock `txn` is currently blocked on.
    ///
    /// Entries are only ever written by lock acquisition itself.
    pub fn waiting_for(&self, txn: TransactionId) -> Option<TmLock> {
        self.graph.lock().waiting.get(&txn).cloned()
    }

    /// Number of transactions currently blocked on some lock.
    pub fn waiting_count(&self) -> usize {
        self.graph.lock().waiting.len()
    }

    /// Returns `true` if the wait-for graph contains a cycle back to `txn`.
    pub fn is_deadlocked(&self, txn: TransactionId) -> bool {
        self.graph.lock().has_cycle(txn)
    }

    /// Wakes every blocked transaction so it re-evaluates its retry loop.
    pub fn signal(&self) {
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _graph = self.graph.lock();
            self.signal.notify_all();
        }
    }

    /// Slow path of lock acquisition.
    ///
    /// Registers `txn` as waiting for `lock` and retries until the lock is
    /// acquired, a cycle through `txn` appears, or `timeout` elapses. The
    /// waiting entry is always removed before returning.
    pub(crate) fn block_until_acquired(
        &self,
        txn: TransactionId,
        lock: &TmLock,
        mode: LockMode,
        timeout: Duration,
    ) -> LockOutcome {
        let deadline = Instant::now() + timeout;
        let mut graph = self.graph.lock();
        // must be visible before the first retry below, see signal()
        self.waiters.fetch_add(1, Ordering::SeqCst);
        graph.set_waiting(txn, lock);
        // let the others re-check their own cycles against the new edge
        self.signal.notify_all();

        let outcome = loop {
            if lock.try_acquire(txn, mode) {
                break LockOutcome::Acquired;
            }
            if graph.has_cycle(txn) {
                break LockOutcome::DeadlockDetected;
            }
            if self.signal.wait_until(&mut graph, deadline).timed_out() {
                if lock.try_acquire(txn, mode) {
                    break LockOutcome::Acquired;
                }
                break LockOutcome::TimedOut;
            }
        };

        graph.clear_waiting(txn);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        self.signal.notify_all();
        outcome
    }
}
