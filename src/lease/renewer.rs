use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace, warn};

use super::Lease;
use crate::{
    store::{LockKeys, LockStore},
    util::runnable::{run_at_fixed_interval, PeriodicRunnable},
};

/// Keeps a held lease alive. Renewal is best effort: a lost lease shows up
/// as a token mismatch at release time, not here.
pub(crate) struct LeaseRenewer<S: LockStore + ?Sized> {
    store: Arc<S>,
    keys: Arc<LockKeys>,
    lease: Lease,
    ttl: Duration,
}

impl<S: LockStore + ?Sized + 'static> LeaseRenewer<S> {
    pub(crate) fn new(store: Arc<S>, keys: Arc<LockKeys>, lease: Lease, ttl: Duration) -> Self {
        Self {
            store,
            keys,
            lease,
            ttl,
        }
    }

    /// Spawns the renewal loop. It ends when the returned handle is stopped
    /// or dropped, or when `cancellation` fires.
    pub(crate) fn start(self, interval: Duration, cancellation: &CancellationToken) -> RenewalHandle {
        let stop = cancellation.child_token();
        let task = tokio::spawn(run_at_fixed_interval(
            Arc::new(self),
            interval,
            stop.clone(),
        ));
        RenewalHandle {
            stop: stop.drop_guard(),
            task,
        }
    }
}

#[async_trait]
impl<S: LockStore + ?Sized + 'static> PeriodicRunnable for LeaseRenewer<S> {
    async fn run_once(&self) {
        match self.lease.refresh(&*self.store, &self.keys, self.ttl).await {
            Ok(true) => trace!(role = %self.lease.role, lock = %self.keys.lock, "lease renewed"),
            Ok(false) => warn!(
                role = %self.lease.role,
                lock = %self.keys.lock,
                "lease renewal rejected, lock record no longer holds our token"
            ),
            Err(err) => warn!(
                role = %self.lease.role,
                lock = %self.keys.lock,
                error = %err,
                "lease renewal failed"
            ),
        }
    }

    async fn before_shutdown_complete(&self) {
        debug!(role = %self.lease.role, lock = %self.keys.lock, "lease renewal stopped");
    }
}

/// Handle on a running [`LeaseRenewer`].
///
/// Dropping the handle cancels the renewer without waiting for it, so a
/// call abandoned mid-section leaves the record to expire within one TTL.
pub(crate) struct RenewalHandle {
    stop: DropGuard,
    task: JoinHandle<()>,
}

impl RenewalHandle {
    /// Signals the renewer and waits until it has actually exited, so no
    /// refresh can race with the release that follows.
    pub(crate) async fn stop(self) {
        let RenewalHandle { stop, task } = self;
        stop.disarm().cancel();
        if let Err(err) = task.await {
            warn!(error = %err, "lease renewal task ended abnormally");
        }
    }
}
