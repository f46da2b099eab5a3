use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_lite::FutureExt;
use futures_timer::Delay;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;
use crate::Error;

/// Runs a closure when dropped.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    dropfn: Option<F>,
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(dropfn) = self.dropfn.take() {
            dropfn();
        }
    }
}

pub(crate) fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard { dropfn: Some(dropfn) }
}

/// Outcome of racing an operation against its timeout and cancellation token.
#[derive(Debug)]
pub(crate) enum Race<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

impl<T> Race<T> {
    /// Maps the losing outcomes onto `Timeout`/`Cancelled` errors.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Race::Completed(value) => Ok(value),
            Race::TimedOut => Err(ErrorKind::Timeout.into()),
            Race::Cancelled => Err(ErrorKind::Cancelled.into()),
        }
    }
}

/// Polls `fut` until it completes, `timeout` elapses or `cancel` fires, whichever comes first. The losers are
/// dropped.
///
/// Cancellation is checked before the operation so an already-cancelled token never reaches the native layer.
pub(crate) async fn race<T>(fut: impl Future<Output = T>, timeout: Duration, cancel: &CancellationToken) -> Race<T> {
    if cancel.is_cancelled() {
        return Race::Cancelled;
    }
    let cancelled = async {
        cancel.cancelled().await;
        Race::Cancelled
    };
    let completed = async { Race::Completed(fut.await) };
    let timed_out = async {
        Delay::new(timeout).await;
        Race::TimedOut
    };
    cancelled.or(completed).or(timed_out).await
}

/// Like [`race`] but without a deadline, for waits on the user such as permission prompts.
pub(crate) async fn until_cancelled<T>(fut: impl Future<Output = T>, cancel: &CancellationToken) -> Race<T> {
    if cancel.is_cancelled() {
        return Race::Cancelled;
    }
    let cancelled = async {
        cancel.cancelled().await;
        Race::Cancelled
    };
    cancelled.or(async { Race::Completed(fut.await) }).await
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
