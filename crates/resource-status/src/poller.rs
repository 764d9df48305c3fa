//! Periodic background refresh of one status adapter

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::adapter::ResourceStatusAdapter;
use crate::resource::Resource;

/// Re-reads a status on a fixed period so that its value stays fresh even
/// when nobody asks for it.
///
/// The poller only holds a weak reference to the resource and stops by
/// itself once the resource is gone or a terminal status has been reached.
/// Dropping the poller stops it as well.
///
/// Adapters never start a poller on their own.
#[derive(Debug)]
pub struct StatusPoller {
   handle: AbortHandle,
}

impl StatusPoller {
   pub fn spawn<R: Resource>(
      resource: &Arc<R>,
      period: Duration,
      adapter: fn(&R) -> &ResourceStatusAdapter<R>,
   ) -> Self {
      let weak = Arc::downgrade(resource);
      let period = period.max(Duration::from_millis(1));

      let task = tokio::spawn(async move {
         let mut ticker = tokio::time::interval(period);
         ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
         // first tick completes immediately
         ticker.tick().await;

         loop {
            ticker.tick().await;
            let Some(resource) = weak.upgrade() else {
               break;
            };

            let adapter = adapter(&resource);
            let value = adapter.get().await;
            trace!(kind = %resource.kind(), status = %adapter.subject(), value, "Polled resource status");

            if value && adapter.is_terminal() {
               break;
            }
         }
      });

      Self {
         handle: task.abort_handle(),
      }
   }

   pub fn is_finished(&self) -> bool {
      self.handle.is_finished()
   }
}

impl Drop for StatusPoller {
   fn drop(&mut self) {
      self.handle.abort();
   }
}
