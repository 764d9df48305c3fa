//! Timeout-bounded execution of potentially hung driver calls
//!
//! This is the only place that waits on a driver call without holding
//! anything but the caller's own adapter lock. The unit of work runs as a
//! separate tokio task, so a driver call that never returns can only ever
//! cost the caller its time budget.

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::error::Error;
use crate::tasks::{BackgroundTasks, TaskMode};
use crate::Result;

/// Outcome of a bounded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bounded<T> {
   /// The work finished within its time budget
   Completed(T),
   /// The caller stopped waiting; the work may still be running
   TimedOut,
}

/// Runs `work` in the background and waits at most `limit` for it.
///
/// When the budget is exceeded the work is left running (tracked by `tasks`
/// according to `mode`) and [`Bounded::TimedOut`] is returned.
pub async fn run_bounded<F>(
   tasks: &BackgroundTasks,
   mode: TaskMode,
   limit: Duration,
   work: F,
) -> Result<Bounded<F::Output>>
where
   F: Future + Send + 'static,
   F::Output: Send + 'static,
{
   let mut handle = tasks.spawn(mode, work);

   match tokio::time::timeout(limit, &mut handle).await {
      Ok(Ok(output)) => Ok(Bounded::Completed(output)),
      Ok(Err(e)) if e.is_panic() => Err(Error::Panicked(e.to_string())),
      Ok(Err(_)) => Err(Error::Aborted),
      Err(_) => {
         trace!(?mode, ?limit, "Bounded call timed out, leaving work in background");
         Ok(Bounded::TimedOut)
      }
   }
}

/// Runs a fallible probe-style call, substituting `fallback` on timeout.
pub async fn call_with_fallback<T, F>(
   tasks: &BackgroundTasks,
   mode: TaskMode,
   limit: Duration,
   fallback: T,
   work: F,
) -> Result<T>
where
   F: Future<Output = Result<T>> + Send + 'static,
   T: Send + 'static,
{
   match run_bounded(tasks, mode, limit, work).await? {
      Bounded::Completed(result) => result,
      Bounded::TimedOut => Ok(fallback),
   }
}
