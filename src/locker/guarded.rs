use std::{future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;

use crate::error::{BoxError, CallbackFault};

/// Runs the critical section and turns both its error and any panic into a
/// [`CallbackFault`]. Nothing raised inside escapes past this point.
pub(crate) async fn run_guarded<F, Fut, T, E>(critical_section: F) -> Result<T, CallbackFault>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    match AssertUnwindSafe(async move { critical_section().await })
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CallbackFault::Error(err.into())),
        Err(payload) => Err(CallbackFault::from_panic(payload)),
    }
}
