//! Asynchronous, timeout-guarded state machine backing one status flag
//!
//! A [`ResourceStatusAdapter`] binds a *subject* status (e.g. CLOSED) of one
//! resource to a *changing* and a *checking* status used as in-flight
//! markers. Reads go through [`get`](ResourceStatusAdapter::get), which probes
//! the driver when the debounce window allows; transitions go through
//! [`set`](ResourceStatusAdapter::set).
//!
//! ```text
//!  get() ──► can_check? ──no──────────────────────────────► subject value
//!               │yes
//!               ▼
//!          lock ─► can_check? ─► CHECKING ─► debounce ─► probe (bounded, daemon)
//!                                               │            │ ok: publish
//!                                               │            │ timeout: keep value
//!                                               │            └ err: fail()
//!                                               └ skip
//!
//!  set(v) ─► may_change? ─► lock ─► may_change? ─► refresh ─► value == v? ─► no-op
//!                                                                │no
//!                                                                ▼
//!                                            CHANGING ─► change (bounded) ─► publish v
//!                                                                └ err/timeout: fail(), Err
//! ```

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::Result;
use crate::bounded::{Bounded, call_with_fallback, run_bounded};
use crate::config::StatusTiming;
use crate::error::Error;
use crate::resource::{Resource, StatusGuard, publish};
use crate::status::{ResourceKind, ResourceStatus};
use crate::tasks::{BackgroundTasks, TaskMode};

/// Probes the real state of the subject status.
pub type ProbeFn<R> = Box<dyn Fn(Arc<R>) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Drives the real state of the subject status to the requested value.
pub type ChangeFn<R> = Box<dyn Fn(Arc<R>, bool) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What to do after a probe or transition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
   /// Publish the terminal status as reached
   ForceTerminal,
   /// Allow the next probe after this delay instead of a full interval
   RetryAfter(Duration),
   /// Leave the status and the debounce window untouched
   Keep,
}

/// Failure policy of an adapter.
///
/// A terminal status that cannot be checked or changed is treated as having
/// reached its terminal state (fail-closed). A debounced status gets a short
/// retry delay, never longer than its own interval.
pub fn failure_action(
   terminal: bool,
   check_interval: Duration,
   retry_delay: Duration,
) -> FailureAction {
   if terminal {
      FailureAction::ForceTerminal
   } else if !check_interval.is_zero() {
      FailureAction::RetryAfter(retry_delay.min(check_interval))
   } else {
      FailureAction::Keep
   }
}

#[derive(Debug, Default)]
struct CheckState {
   /// Earliest time the next probe may run; `None` probes immediately
   next_check: Option<Instant>,
}

/// Status state machine for one (resource, subject status) pair.
///
/// Holds only a weak reference to its resource; once the resource is gone
/// the adapter is inert (`get` returns `false`, `set` does nothing).
pub struct ResourceStatusAdapter<R: Resource> {
   resource: Weak<R>,
   subject: ResourceStatus,
   changing: ResourceStatus,
   checking: ResourceStatus,
   check_interval: Duration,
   terminal: bool,
   timing: StatusTiming,
   tasks: BackgroundTasks,
   probe: ProbeFn<R>,
   change: ChangeFn<R>,
   state: Mutex<CheckState>,
}

impl<R: Resource> ResourceStatusAdapter<R> {
   pub fn builder(
      subject: ResourceStatus,
      changing: ResourceStatus,
      checking: ResourceStatus,
   ) -> StatusAdapterBuilder<R> {
      StatusAdapterBuilder::new(subject, changing, checking)
   }

   pub fn subject(&self) -> ResourceStatus {
      self.subject
   }

   pub fn is_terminal(&self) -> bool {
      self.terminal
   }

   pub fn check_interval(&self) -> Duration {
      self.check_interval
   }

   /// Returns the last published value without probing.
   pub fn peek(&self) -> bool {
      self
         .resource
         .upgrade()
         .is_some_and(|resource| resource.is(self.subject))
   }

   /// Returns the current value of the subject status, probing first if no
   /// other probe or transition is in flight and the debounce window allows.
   pub async fn get(&self) -> bool {
      let Some(resource) = self.resource.upgrade() else {
         trace!(status = %self.subject, "Resource released, status adapter is inert");
         return false;
      };

      if self.can_check(&resource) {
         let mut state = self.state.lock().await;
         if self.can_check(&resource) {
            self.check(&resource, &mut state).await;
         }
      }

      resource.is(self.subject)
   }

   /// Requests a transition of the subject status to `value`.
   ///
   /// Does nothing if a transition is already in flight, if the status is
   /// terminal and already reached, or if the status already has `value`.
   /// Driver failures and timeouts are returned after the failure policy has
   /// been applied.
   pub async fn set(&self, value: bool) -> Result<()> {
      let Some(resource) = self.resource.upgrade() else {
         trace!(status = %self.subject, "Resource released, ignoring status change");
         return Ok(());
      };

      if !self.may_change(&resource) {
         return Ok(());
      }

      let mut state = self.state.lock().await;
      if !self.may_change(&resource) {
         return Ok(());
      }

      if self.can_check(&resource) {
         self.check(&resource, &mut state).await;
      }
      if resource.is(self.subject) == value {
         return Ok(());
      }

      let _changing = StatusGuard::raise(&*resource, self.changing);
      self.change_controlled(&resource, &mut state, value).await
   }

   fn can_check(&self, resource: &R) -> bool {
      if resource.is(self.checking) || resource.is(self.changing) {
         false
      } else {
         !(self.terminal && resource.is(self.subject))
      }
   }

   fn may_change(&self, resource: &R) -> bool {
      if resource.is(self.changing) {
         false
      } else {
         !(self.terminal && resource.is(self.subject))
      }
   }

   async fn check(&self, resource: &Arc<R>, state: &mut CheckState) {
      let _checking = StatusGuard::raise(&**resource, self.checking);

      if !self.check_interval.is_zero() {
         let now = Instant::now();
         if let Some(next_check) = state.next_check
            && now < next_check
         {
            return;
         }
         state.next_check = Some(now + self.check_interval);
      }

      match self.check_controlled(resource).await {
         Ok(value) => {
            publish(&**resource, self.subject, value);
         }
         Err(e) => {
            warn!(
               kind = %resource.kind(),
               status = %self.subject,
               error = %e,
               "Failed to check resource status"
            );
            self.fail(resource, state);
         }
      }
   }

   async fn check_controlled(&self, resource: &Arc<R>) -> Result<bool> {
      let current = resource.is(self.subject);
      let work = (self.probe)(Arc::clone(resource));

      call_with_fallback(
         &self.tasks,
         TaskMode::Daemon,
         self.timing.check_timeout(),
         current,
         work,
      )
      .await
   }

   async fn change_controlled(
      &self,
      resource: &Arc<R>,
      state: &mut CheckState,
      value: bool,
   ) -> Result<()> {
      let kind = resource.kind();
      let subject = self.subject;

      // Closing a connection must be allowed to finish even on shutdown
      let mode = if kind == ResourceKind::Connection && subject == ResourceStatus::Closed {
         TaskMode::NonDaemon
      } else {
         TaskMode::Daemon
      };

      debug!(%kind, status = %subject, value, "Started changing resource status");

      let target = Arc::clone(resource);
      let change = (self.change)(Arc::clone(resource), value);
      let work = async move {
         change.await?;
         publish(&*target, subject, value);
         Ok::<(), Error>(())
      };

      let timeout = self.timing.change_timeout();
      let outcome = match run_bounded(&self.tasks, mode, timeout, work).await {
         Ok(Bounded::Completed(result)) => result,
         Ok(Bounded::TimedOut) => Err(Error::Timeout {
            kind,
            status: subject,
            value,
            timeout,
         }),
         Err(e) => Err(e),
      };

      if let Err(e) = &outcome {
         warn!(%kind, status = %subject, value, error = %e, "Failed to change resource status");
         self.fail(resource, state);
      }

      debug!(%kind, status = %subject, value, "Done changing resource status");
      outcome
   }

   fn fail(&self, resource: &R, state: &mut CheckState) {
      match failure_action(self.terminal, self.check_interval, self.timing.retry_delay()) {
         FailureAction::ForceTerminal => {
            publish(resource, self.subject, true);
         }
         FailureAction::RetryAfter(delay) => {
            state.next_check = Some(Instant::now() + delay);
         }
         FailureAction::Keep => {}
      }
   }
}

impl<R: Resource> std::fmt::Debug for ResourceStatusAdapter<R> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ResourceStatusAdapter")
         .field("subject", &self.subject)
         .field("value", &self.peek())
         .field("terminal", &self.terminal)
         .field("check_interval", &self.check_interval)
         .finish()
   }
}

/// Builder for [`ResourceStatusAdapter`].
///
/// Without a probe the adapter reports the last published value; without a
/// change function transitions only publish the requested value.
pub struct StatusAdapterBuilder<R: Resource> {
   subject: ResourceStatus,
   changing: ResourceStatus,
   checking: ResourceStatus,
   check_interval: Duration,
   terminal: bool,
   timing: StatusTiming,
   tasks: Option<BackgroundTasks>,
   probe: Option<ProbeFn<R>>,
   change: Option<ChangeFn<R>>,
}

impl<R: Resource> StatusAdapterBuilder<R> {
   pub fn new(subject: ResourceStatus, changing: ResourceStatus, checking: ResourceStatus) -> Self {
      Self {
         subject,
         changing,
         checking,
         check_interval: Duration::ZERO,
         terminal: false,
         timing: StatusTiming::default(),
         tasks: None,
         probe: None,
         change: None,
      }
   }

   /// Minimum time between two probes. Zero probes on every read.
   pub fn check_interval(mut self, interval: Duration) -> Self {
      self.check_interval = interval;
      self
   }

   /// Once a terminal status is `true` it is never probed or changed again.
   pub fn terminal(mut self, terminal: bool) -> Self {
      self.terminal = terminal;
      self
   }

   pub fn timing(mut self, timing: StatusTiming) -> Self {
      self.timing = timing;
      self
   }

   /// Registry used to track the background work of probes and transitions.
   pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
      self.tasks = Some(tasks);
      self
   }

   pub fn probe<F, Fut>(mut self, probe: F) -> Self
   where
      F: Fn(Arc<R>) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<bool>> + Send + 'static,
   {
      self.probe = Some(Box::new(move |resource: Arc<R>| probe(resource).boxed()));
      self
   }

   pub fn change<F, Fut>(mut self, change: F) -> Self
   where
      F: Fn(Arc<R>, bool) -> Fut + Send + Sync + 'static,
      Fut: Future<Output = Result<()>> + Send + 'static,
   {
      self.change = Some(Box::new(move |resource: Arc<R>, value: bool| {
         change(resource, value).boxed()
      }));
      self
   }

   pub fn build(self, resource: Weak<R>) -> ResourceStatusAdapter<R> {
      let subject = self.subject;
      let probe = self.probe.unwrap_or_else(|| {
         Box::new(move |resource: Arc<R>| {
            let value = resource.is(subject);
            async move { Ok::<bool, Error>(value) }.boxed()
         })
      });
      let change = self
         .change
         .unwrap_or_else(|| Box::new(|_: Arc<R>, _: bool| async { Ok::<(), Error>(()) }.boxed()));

      ResourceStatusAdapter {
         resource,
         subject,
         changing: self.changing,
         checking: self.checking,
         check_interval: self.check_interval,
         terminal: self.terminal,
         timing: self.timing,
         tasks: self.tasks.unwrap_or_default(),
         probe,
         change,
         state: Mutex::new(CheckState::default()),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_terminal_failures_force_terminal_state() {
      assert_eq!(
         failure_action(true, Duration::ZERO, Duration::from_secs(5)),
         FailureAction::ForceTerminal
      );
      assert_eq!(
         failure_action(true, Duration::from_secs(10), Duration::from_secs(5)),
         FailureAction::ForceTerminal
      );
   }

   #[test]
   fn test_debounced_failures_retry_early() {
      assert_eq!(
         failure_action(false, Duration::from_secs(30), Duration::from_secs(5)),
         FailureAction::RetryAfter(Duration::from_secs(5))
      );
      // retry never waits longer than the interval itself
      assert_eq!(
         failure_action(false, Duration::from_secs(1), Duration::from_secs(5)),
         FailureAction::RetryAfter(Duration::from_secs(1))
      );
   }

   #[test]
   fn test_undebounced_failures_keep_state() {
      assert_eq!(
         failure_action(false, Duration::ZERO, Duration::from_secs(5)),
         FailureAction::Keep
      );
   }
}
