//! Running module-supplied callables without letting their panics escape.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Call `make` and await the future it returns; a panic in either step
/// becomes an `Err`.
pub(crate) async fn guarded<T, F>(make: F) -> anyhow::Result<T>
where
    F: FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(make)) {
        Ok(fut) => fut,
        Err(payload) => anyhow::bail!("panicked: {}", panic_message(&*payload)),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(payload) => anyhow::bail!("panicked: {}", panic_message(&*payload)),
    }
}

/// [`guarded`] under an optional deadline.
pub(crate) async fn guarded_with_timeout<T, F>(
    deadline: Option<Duration>,
    make: F,
) -> anyhow::Result<T>
where
    F: FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, guarded(make))
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("timed out after {d:?}"))),
        None => guarded(make).await,
    }
}
