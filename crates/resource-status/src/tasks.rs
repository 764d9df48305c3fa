//! Tracking of background work spawned by timeout-bounded calls

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// How background work behaves once nobody waits for it anymore.
///
/// Both modes keep running after the caller's timeout expires and may still
/// publish their result later. They differ at shutdown: daemon work is
/// aborted, non-daemon work is waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
   Daemon,
   NonDaemon,
}

struct TasksInner {
   next_id: AtomicU64,
   daemon: Mutex<HashMap<u64, AbortHandle>>,
   pending: watch::Sender<usize>,
}

/// Registry of in-flight background work.
///
/// Cheap to clone; all clones share the same registry. One registry is
/// usually shared by every adapter belonging to one logical database handle
/// so that disposing the handle can shut all of it down at once.
#[derive(Clone)]
pub struct BackgroundTasks {
   inner: Arc<TasksInner>,
}

impl Default for BackgroundTasks {
   fn default() -> Self {
      let (pending, _) = watch::channel(0);
      Self {
         inner: Arc::new(TasksInner {
            next_id: AtomicU64::new(0),
            daemon: Mutex::new(HashMap::new()),
            pending,
         }),
      }
   }
}

impl BackgroundTasks {
   pub fn new() -> Self {
      Self::default()
   }

   /// Spawns `work` on the tokio runtime and tracks it until it finishes.
   pub fn spawn<F>(&self, mode: TaskMode, work: F) -> JoinHandle<F::Output>
   where
      F: Future + Send + 'static,
      F::Output: Send + 'static,
   {
      let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
      let ticket = Ticket {
         id,
         mode,
         inner: Arc::clone(&self.inner),
      };

      match mode {
         TaskMode::Daemon => {
            // Hold the lock across spawn so the ticket cannot be dropped
            // before its abort handle is registered
            let mut daemon = self.inner.daemon.lock();
            let handle = tokio::spawn(async move {
               let _ticket = ticket;
               work.await
            });
            daemon.insert(id, handle.abort_handle());
            handle
         }
         TaskMode::NonDaemon => {
            self.inner.pending.send_modify(|n| *n += 1);
            tokio::spawn(async move {
               let _ticket = ticket;
               work.await
            })
         }
      }
   }

   /// Number of daemon tasks still running
   pub fn daemon_count(&self) -> usize {
      self.inner.daemon.lock().len()
   }

   /// Number of non-daemon tasks still running
   pub fn pending_count(&self) -> usize {
      *self.inner.pending.borrow()
   }

   /// Aborts all daemon work and waits up to `grace` for non-daemon work.
   ///
   /// Returns `true` if every non-daemon task finished in time.
   pub async fn shutdown(&self, grace: Duration) -> bool {
      let aborted: Vec<AbortHandle> = {
         let mut daemon = self.inner.daemon.lock();
         daemon.drain().map(|(_, handle)| handle).collect()
      };

      debug!("Aborting {} daemon background task(s)", aborted.len());
      for handle in aborted {
         handle.abort();
      }

      let mut rx = self.inner.pending.subscribe();
      let waiting = *rx.borrow();
      if waiting > 0 {
         debug!("Waiting for {} non-daemon background task(s)", waiting);
      }

      match tokio::time::timeout(grace, rx.wait_for(|n| *n == 0)).await {
         Ok(Ok(_)) => true,
         Ok(Err(_)) => true,
         Err(_) => {
            debug!(
               "{} non-daemon background task(s) still running after {:?}",
               self.pending_count(),
               grace
            );
            false
         }
      }
   }
}

impl std::fmt::Debug for BackgroundTasks {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("BackgroundTasks")
         .field("daemon", &self.daemon_count())
         .field("pending", &self.pending_count())
         .finish()
   }
}

/// Deregisters a task when its future completes or is dropped by an abort.
struct Ticket {
   id: u64,
   mode: TaskMode,
   inner: Arc<TasksInner>,
}

impl Drop for Ticket {
   fn drop(&mut self) {
      match self.mode {
         TaskMode::Daemon => {
            self.inner.daemon.lock().remove(&self.id);
         }
         TaskMode::NonDaemon => {
            self.inner.pending.send_modify(|n| *n = n.saturating_sub(1));
         }
      }
   }
}
