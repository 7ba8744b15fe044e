//! Core transaction data structures
//!
//! Defines the fundamental types shared by the lock manager and the
//! transaction context:
//! - TransactionId: identity of a transaction in the wait-for graph
//! - TransactionState: lifecycle of a transaction context
//! - LockMode: the two modes of an upgradeable lock
//! - LockOutcome: explicit result of a lock acquisition attempt
//! - UndoAction: a compensating action replayed on rollback

use crate::errors::{CacheError, CacheResult, ErrorKind};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identity of a transaction.
///
/// Every [`TransactionContext`](super::TransactionContext) carries one. It is
/// what lock owner sets and the wait-for registry are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a fresh, random transaction id.
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the state of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Context is accepting locks and undo entries
    Active,
    /// Locks released and undo log discarded
    Committed,
    /// Undo log replayed and locks released
    Aborted,
}

/// The two modes of an upgradeable lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared mode, any number of holders
    Read,
    /// Exclusive mode, a single holder
    Write,
}

impl Display for LockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// Outcome of a lock acquisition attempt.
///
/// Lock failures are values, not panics. A caller that receives one of the
/// failing variants must roll its transaction context back; see
/// [`LockOutcome::into_result`] for the `?`-friendly form.
#[must_use = "a failed lock acquisition requires a rollback"]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOutcome {
    /// The lock was acquired by this call
    Acquired,
    /// The caller already held the lock in a sufficient mode
    AlreadyHeld,
    /// The bounded retry window elapsed
    TimedOut,
    /// A cycle rooted at the caller was found in the wait-for graph
    DeadlockDetected,
    /// A read to write upgrade could not complete; the read hold is gone
    UpgradeFailed,
}

impl LockOutcome {
    /// Returns `true` if the caller holds the lock after the call.
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired | LockOutcome::AlreadyHeld)
    }

    /// Converts the outcome into a [`CacheResult`].
    pub fn into_result(self) -> CacheResult<()> {
        match self {
            LockOutcome::Acquired | LockOutcome::AlreadyHeld => Ok(()),
            LockOutcome::TimedOut => Err(CacheError::new(
                "Timed out waiting for lock",
                ErrorKind::LockTimeout,
            )),
            LockOutcome::DeadlockDetected => Err(CacheError::new(
                "Deadlock detected while waiting for lock",
                ErrorKind::DeadlockDetected,
            )),
            LockOutcome::UpgradeFailed => Err(CacheError::new(
                "Another writer intervened during read to write upgrade",
                ErrorKind::UpgradeFailed,
            )),
        }
    }
}

/// A compensating action recorded before a mutation and replayed on rollback.
///
/// Undo actions only touch the data they compensate for; they never acquire
/// transactional locks because the context replaying them still holds those.
pub type UndoAction = Box<dyn FnOnce() + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_transaction_id_display_is_uuid() {
        let id = TransactionId::new();
        let display = id.to_string();
        assert_eq!(display.len(), 36);
        assert_eq!(display, id.as_uuid().to_string());
    }

    #[test]
    fn test_transaction_state_debug_format() {
        assert_eq!(format!("{:?}", TransactionState::Active), "Active");
        assert_ne!(TransactionState::Committed, TransactionState::Aborted);
    }

    #[test]
    fn test_lock_mode_display() {
        assert_eq!(LockMode::Read.to_string(), "read");
        assert_eq!(LockMode::Write.to_string(), "write");
    }

    #[test]
    fn test_outcome_is_acquired() {
        assert!(LockOutcome::Acquired.is_acquired());
        assert!(LockOutcome::AlreadyHeld.is_acquired());
        assert!(!LockOutcome::TimedOut.is_acquired());
        assert!(!LockOutcome::DeadlockDetected.is_acquired());
        assert!(!LockOutcome::UpgradeFailed.is_acquired());
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(LockOutcome::Acquired.into_result().is_ok());
        assert!(LockOutcome::AlreadyHeld.into_result().is_ok());

        let err = LockOutcome::TimedOut.into_result().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::LockTimeout);

        let err = LockOutcome::DeadlockDetected.into_result().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DeadlockDetected);

        let err = LockOutcome::UpgradeFailed.into_result().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UpgradeFailed);
        assert!(err.is_lock_failure());
    }

    #[test]
    fn test_undo_action_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let action: UndoAction = Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        action();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
