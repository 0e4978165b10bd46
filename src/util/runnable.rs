use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Waits one `interval`, then runs the runnable, until `shutdown` fires.
///
/// A `run_once` already in progress is allowed to finish; shutdown is only
/// observed between runs. Returns once `before_shutdown_complete` is done, so
/// awaiting the spawned task is the shutdown acknowledgement.
pub(crate) async fn run_at_fixed_interval<T: PeriodicRunnable + ?Sized>(
    runnable: Arc<T>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut last_loop_time = Instant::now();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = sleep_until(last_loop_time + interval) => {}
        }
        last_loop_time = Instant::now();
        runnable.run_once().await;
    }

    runnable.before_shutdown_complete().await;
}

#[async_trait]
pub(crate) trait PeriodicRunnable: Send + Sync {
    async fn run_once(&self);
    async fn before_shutdown_complete(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicRunnable for Counter {
        async fn run_once(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn before_shutdown_complete(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_each_interval_until_shutdown() {
        let counter = Arc::new(Counter::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_at_fixed_interval(
            counter.clone(),
            Duration::from_millis(100),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);
        assert_eq!(counter.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_interval_skips_the_run() {
        let counter = Arc::new(Counter::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_at_fixed_interval(counter.clone(), Duration::from_millis(100), shutdown).await;

        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);
        assert_eq!(counter.stopped.load(Ordering::SeqCst), 1);
    }
}
