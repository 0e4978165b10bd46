//! Per-call lock orchestration.
//!
//! A call moves through `Idle → Acquiring → Holding → Releasing → Done`.
//! Acquisition can end in [`LockError::TimedOut`], [`LockError::Interrupted`]
//! or [`LockError::ConnectionFailed`]; once the lock is held, the renewer is
//! always stopped and release always attempted, whatever the critical
//! section does.

use std::{future::Future, sync::Arc};

use futures_retry::FutureRetry;
use tracing::{debug, warn};

use crate::{
    error::{BoxError, CallbackFault, LockError, StoreError},
    lease::{Lease, LeaseRenewer},
    options::Options,
    store::{LockKeys, LockStore},
    token,
    util::retry::{AttemptError, FixedCountStrategy},
};

mod guarded;

/// Runs critical sections under a distributed reader/writer lock.
///
/// All state lives in the store; the locker holds no lock state of its own,
/// so any number of lockers in any number of processes may share the same
/// keys.
pub struct Locker<S: LockStore + ?Sized> {
    store: Arc<S>,
    keys: Arc<LockKeys>,
    options: Options,
}

impl<S: LockStore + ?Sized + 'static> Locker<S> {
    /// Creates a locker over `keys`. Options are normalized here.
    pub fn new(store: Arc<S>, keys: LockKeys, options: Options) -> Self {
        Self {
            store,
            keys: Arc::new(keys),
            options: options.normalized(),
        }
    }

    pub fn keys(&self) -> &LockKeys {
        &self.keys
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Runs `critical_section` with shared reader access.
    pub async fn run_shared<F, Fut, T, E>(&self, critical_section: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let lease = Lease::reader(self.options.reader_token.clone());
        self.run(lease, critical_section).await
    }

    /// Runs `critical_section` with exclusive writer access.
    pub async fn run_exclusive<F, Fut, T, E>(&self, critical_section: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let lease = Lease::writer(token::writer_token(&self.options.app_id));
        self.run(lease, critical_section).await
    }

    async fn run<F, Fut, T, E>(&self, lease: Lease, critical_section: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if let Err(err) = self.store.ping().await {
            warn!(lock = %self.keys.lock, error = %err, "lock store unreachable");
            return Err(LockError::ConnectionFailed(err));
        }

        let attempts = self.acquire(&lease).await?;
        debug!(role = %lease.role, lock = %self.keys.lock, attempts, "lock acquired");

        let renewal = LeaseRenewer::new(
            self.store.clone(),
            self.keys.clone(),
            lease.clone(),
            self.options.lease_ttl,
        )
        .start(self.options.renewal_interval(), &self.options.cancellation);

        let outcome = guarded::run_guarded(critical_section).await;

        renewal.stop().await;
        let released = lease.release(&*self.store, &self.keys).await;
        debug!(role = %lease.role, lock = %self.keys.lock, released = ?released.as_ref().ok(), "lock release finished");

        settle(outcome, released)
    }

    /// Retries the lease's acquire operation until it succeeds, the attempt
    /// budget runs out, or a hard failure occurs. Returns the attempts used.
    async fn acquire(&self, lease: &Lease) -> Result<usize, LockError> {
        let mut attempt = 0_usize;
        let factory = || {
            attempt += 1;
            let first = attempt == 1;
            async move {
                if !first {
                    self.pause_between_attempts().await.map_err(AttemptError::Fatal)?;
                }
                match lease
                    .acquire(&*self.store, &self.keys, self.options.lease_ttl, self.options.mode)
                    .await
                {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(AttemptError::Busy),
                    Err(err) => Err(AttemptError::Fatal(LockError::ConnectionFailed(err))),
                }
            }
        };

        match FutureRetry::new(factory, FixedCountStrategy::new(self.options.retry_count)).await {
            Ok(((), attempts)) => Ok(attempts),
            Err((err, attempts)) => {
                debug!(
                    role = %lease.role,
                    lock = %self.keys.lock,
                    attempts,
                    error = %err,
                    "lock not acquired"
                );
                Err(err)
            }
        }
    }

    async fn pause_between_attempts(&self) -> Result<(), LockError> {
        tokio::select! {
            biased;
            _ = self.options.cancellation.cancelled() => Err(LockError::Interrupted),
            _ = tokio::time::sleep(self.options.retry_interval) => Ok(()),
        }
    }
}

/// A fault from the critical section wins over anything release reports.
fn settle<T>(
    outcome: Result<T, CallbackFault>,
    released: Result<bool, StoreError>,
) -> Result<T, LockError> {
    let value = match outcome {
        Ok(value) => value,
        Err(fault) => {
            match released {
                Err(err) => warn!(error = %err, "release failed after critical section fault"),
                Ok(false) => warn!("lock lost while critical section was failing"),
                Ok(true) => {}
            }
            return Err(LockError::CallbackFaulted(fault));
        }
    };
    match released {
        Ok(true) => Ok(value),
        Ok(false) => Err(LockError::NotReleased),
        Err(err) => Err(LockError::ConnectionFailed(err)),
    }
}
