//! Shared async helpers.

use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Run a blocking call (generator process, image synthesis) off the runtime.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

pub async fn blocking_with_timeout<F, T>(duration: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match timeout(duration, spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// How a [`pause`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Pause {
    if cancel.is_cancelled() {
        return Pause::Cancelled;
    }
    if duration.is_zero() {
        // Retry loops built on a zero pause must still let other tasks run.
        tokio::task::yield_now().await;
        return Pause::Elapsed;
    }
    tokio::select! {
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = tokio::time::sleep(duration) => Pause::Elapsed,
    }
}

/// Seconds with millisecond precision, for log lines.
pub fn secs(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}
