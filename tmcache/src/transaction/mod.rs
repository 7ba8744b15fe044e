//! Transaction module
//!
//! Provides the lock manager behind the transactional cache: an upgradeable,
//! deadlock-detecting read/write lock, the process-wide wait-for registry it
//! reports to, and the per-transaction context holding acquired locks and the
//! undo log.

pub mod context;
pub mod core;
pub mod lock;
pub mod wait_for;

pub use context::{commit, rollback, TransactionContext};
pub use core::{LockMode, LockOutcome, TransactionId, TransactionState, UndoAction};
pub use lock::{TmLock, DEFAULT_LOCK_TIMEOUT};
pub use wait_for::WaitForRegistry;
