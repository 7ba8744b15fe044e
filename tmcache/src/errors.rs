use backtrace::Backtrace;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for cache and lock operations.
///
/// The three lock kinds ([`ErrorKind::LockTimeout`], [`ErrorKind::DeadlockDetected`]
/// and [`ErrorKind::UpgradeFailed`]) all mean the same thing to a caller: the
/// current attempt is aborted and the transaction context must be rolled back.
/// Use [`CacheError::is_lock_failure`] when the distinction does not matter.
///
/// # Examples
///
/// ```rust
/// use tmcache::errors::{CacheError, CacheResult, ErrorKind};
///
/// fn example() -> CacheResult<()> {
///     Err(CacheError::new("shard count must be positive", ErrorKind::InvalidConfiguration))
/// }
///
/// assert!(example().is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Lock acquisition failures
    /// The bounded retry window elapsed before the lock could be acquired
    LockTimeout,
    /// A cycle rooted at the caller was found in the wait-for graph
    DeadlockDetected,
    /// A read to write upgrade lost its read hold and could not complete cleanly
    UpgradeFailed,

    // Configuration Errors
    /// A configuration value is out of range
    InvalidConfiguration,

    // Operation Errors
    /// The operation is not valid in the current context
    InvalidOperation,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::LockTimeout => write!(f, "Lock timeout"),
            ErrorKind::DeadlockDetected => write!(f, "Deadlock detected"),
            ErrorKind::UpgradeFailed => write!(f, "Lock upgrade failed"),
            ErrorKind::InvalidConfiguration => write!(f, "Invalid configuration"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type for every fallible operation in this crate.
///
/// `CacheError` carries a message, an [`ErrorKind`], an optional cause and an
/// unresolved backtrace that is symbolized lazily when the error is printed
/// with `{:?}`.
///
/// # Examples
///
/// ```rust
/// use tmcache::errors::{CacheError, ErrorKind};
///
/// let cause = CacheError::new("shard 3 is busy", ErrorKind::LockTimeout);
/// let err = CacheError::new_with_cause("put aborted", ErrorKind::LockTimeout, cause);
/// assert!(err.is_lock_failure());
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct CacheError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<CacheError>>,
    backtrace: Arc<Mutex<Backtrace>>,
}

impl CacheError {
    /// Creates a new `CacheError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        CacheError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    /// Creates a new `CacheError` that wraps an underlying cause.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: CacheError) -> Self {
        CacheError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&CacheError> {
        self.cause.as_deref()
    }

    /// Returns `true` when the error is one of the lock acquisition failures.
    ///
    /// Retry policy is identical for all of them: roll the transaction back and,
    /// if desired, start over with fresh locks.
    pub fn is_lock_failure(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::LockTimeout | ErrorKind::DeadlockDetected | ErrorKind::UpgradeFailed
        )
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = self.backtrace.lock();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, *backtrace)
            }
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// `CacheResult<T>` is shorthand for `Result<T, CacheError>`.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(msg: String) -> Self {
        CacheError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for CacheError {
    fn from(msg: &str) -> Self {
        CacheError::new(msg, ErrorKind::InternalError)
    }
}
