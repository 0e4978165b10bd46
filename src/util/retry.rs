use futures_retry::{ErrorHandler, RetryPolicy};

use crate::error::LockError;

/// Outcome of a single failed acquisition attempt.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// The lock is held by someone else; worth another try.
    Busy,
    /// Anything else. Never retried.
    Fatal(LockError),
}

/// Retries busy attempts until `max_attempts` have been made.
///
/// The pause between attempts is taken by the attempt itself so that it can
/// observe cancellation, hence `Repeat` rather than `WaitRetry`.
pub(crate) struct FixedCountStrategy {
    max_attempts: usize,
}

impl FixedCountStrategy {
    pub(crate) fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }
}

impl ErrorHandler<AttemptError> for FixedCountStrategy {
    type OutError = LockError;

    fn handle(&mut self, attempt: usize, e: AttemptError) -> RetryPolicy<LockError> {
        match e {
            AttemptError::Fatal(err) => RetryPolicy::ForwardError(err),
            AttemptError::Busy if attempt >= self.max_attempts => {
                RetryPolicy::ForwardError(LockError::TimedOut { attempts: attempt })
            }
            AttemptError::Busy => RetryPolicy::Repeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_attempts_repeat_until_the_budget_is_spent() {
        let mut strategy = FixedCountStrategy::new(3);

        assert!(matches!(strategy.handle(1, AttemptError::Busy), RetryPolicy::Repeat));
        assert!(matches!(strategy.handle(2, AttemptError::Busy), RetryPolicy::Repeat));
        assert!(matches!(
            strategy.handle(3, AttemptError::Busy),
            RetryPolicy::ForwardError(LockError::TimedOut { attempts: 3 })
        ));
    }

    #[test]
    fn fatal_errors_are_forwarded_immediately() {
        let mut strategy = FixedCountStrategy::new(200);

        assert!(matches!(
            strategy.handle(1, AttemptError::Fatal(LockError::Interrupted)),
            RetryPolicy::ForwardError(LockError::Interrupted)
        ));
    }
}
