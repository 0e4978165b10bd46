//! Error types produced by the lock store and the coordinator.

use std::{any::Any, error::Error as StdError, fmt};

use thiserror::Error;

/// Boxed error returned from a caller's critical section.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failures raised by a [`LockStore`](crate::store::LockStore) call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis client reported a transport or script failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A lock key held a value the protocol does not understand.
    #[error("corrupted value in key '{key}': {reason}")]
    Corrupted { key: String, reason: String },
}

/// Failures returned by [`Locker::run_shared`](crate::Locker::run_shared) and
/// [`Locker::run_exclusive`](crate::Locker::run_exclusive).
#[derive(Debug, Error)]
pub enum LockError {
    /// The store was unreachable at the probe, or an atomic operation failed in transport.
    #[error("store connection error: {0}")]
    ConnectionFailed(#[source] StoreError),

    /// Every acquisition attempt found the lock busy.
    #[error("timeout exceeded after {attempts} attempts but lock not acquired")]
    TimedOut { attempts: usize },

    /// The cancellation signal fired while waiting between attempts.
    #[error("interrupted")]
    Interrupted,

    /// Release found a different token in the lock record; the lease was lost while held.
    #[error("lock was not released")]
    NotReleased,

    /// A mode value that is neither prefer-reader nor prefer-writer.
    #[error("lock is in unknown mode: '{0}'")]
    UnknownMode(String),

    /// The critical section failed or panicked.
    #[error("critical section failed: {0}")]
    CallbackFaulted(#[source] CallbackFault),
}

impl LockError {
    /// Whether acquisition ran out of attempts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::TimedOut { .. })
    }

    /// Takes the critical section's own error back out, if that is what failed.
    pub fn into_callback_error(self) -> Option<BoxError> {
        match self {
            LockError::CallbackFaulted(CallbackFault::Error(err)) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LockError {
    fn from(source: StoreError) -> Self {
        LockError::ConnectionFailed(source)
    }
}

/// A fault raised while the lock was held.
#[derive(Debug)]
pub enum CallbackFault {
    /// The critical section returned an error.
    Error(BoxError),
    /// The critical section panicked; holds the panic message.
    Panic(String),
}

impl CallbackFault {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "unknown panic".to_string(),
            },
        };
        CallbackFault::Panic(message)
    }
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFault::Error(err) => write!(f, "{}", err),
            CallbackFault::Panic(message) => write!(f, "panicked: {}", message),
        }
    }
}

impl StdError for CallbackFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CallbackFault::Error(err) => Some(err.as_ref()),
            CallbackFault::Panic(_) => None,
        }
    }
}
