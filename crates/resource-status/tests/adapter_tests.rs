//! Integration tests for the status adapter state machine

use resource_status::{
   BackgroundTasks, DriverError, Error, Resource, ResourceKind, ResourceStatus,
   ResourceStatusAdapter, StatusPoller, StatusSet, StatusTiming, publish,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Fake {
   kind: ResourceKind,
   statuses: StatusSet,
   probes: AtomicUsize,
   changes: AtomicUsize,
   notifications: AtomicUsize,
}

impl Fake {
   fn new(kind: ResourceKind) -> Arc<Self> {
      Arc::new(Self {
         kind,
         statuses: StatusSet::new(),
         probes: AtomicUsize::new(0),
         changes: AtomicUsize::new(0),
         notifications: AtomicUsize::new(0),
      })
   }

   fn probes(&self) -> usize {
      self.probes.load(Ordering::SeqCst)
   }

   fn changes(&self) -> usize {
      self.changes.load(Ordering::SeqCst)
   }
}

impl Resource for Fake {
   fn kind(&self) -> ResourceKind {
      self.kind
   }

   fn statuses(&self) -> &StatusSet {
      &self.statuses
   }

   fn status_changed(&self, _status: ResourceStatus) {
      self.notifications.fetch_add(1, Ordering::SeqCst);
   }
}

fn closed_adapter() -> resource_status::StatusAdapterBuilder<Fake> {
   ResourceStatusAdapter::builder(
      ResourceStatus::Closed,
      ResourceStatus::Closing,
      ResourceStatus::CheckingClosed,
   )
}

fn valid_adapter() -> resource_status::StatusAdapterBuilder<Fake> {
   ResourceStatusAdapter::builder(
      ResourceStatus::Valid,
      ResourceStatus::ChangingValid,
      ResourceStatus::CheckingValid,
   )
}

fn fast_timing() -> StatusTiming {
   StatusTiming {
      check_timeout_ms: 50,
      change_timeout_ms: 50,
      retry_delay_ms: 50,
   }
}

#[tokio::test]
async fn test_failed_terminal_probe_reports_closed_once() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = closed_adapter()
      .terminal(true)
      .probe(|r: Arc<Fake>| async move {
         r.probes.fetch_add(1, Ordering::SeqCst);
         Err::<bool, _>(DriverError::connection_lost("socket reset").into())
      })
      .build(Arc::downgrade(&resource));

   assert!(adapter.get().await);
   assert!(adapter.get().await);
   assert_eq!(resource.probes(), 1);
   assert_eq!(resource.notifications.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_debounced_probe_runs_once_per_interval() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = valid_adapter()
      .check_interval(Duration::from_millis(50))
      .probe(|r: Arc<Fake>| async move {
         r.probes.fetch_add(1, Ordering::SeqCst);
         Ok(true)
      })
      .build(Arc::downgrade(&resource));

   assert!(adapter.get().await);
   assert!(adapter.get().await);
   assert!(adapter.get().await);
   assert_eq!(resource.probes(), 1);

   tokio::time::sleep(Duration::from_millis(80)).await;
   assert!(adapter.get().await);
   assert_eq!(resource.probes(), 2);
}

#[tokio::test]
async fn test_published_terminal_status_ends_probing() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = closed_adapter()
      .terminal(true)
      .probe(|r: Arc<Fake>| async move {
         r.probes.fetch_add(1, Ordering::SeqCst);
         Ok(false)
      })
      .build(Arc::downgrade(&resource));

   assert!(!adapter.get().await);
   assert_eq!(resource.probes(), 1);

   // closed by the driver behind the adapter's back
   publish(&*resource, ResourceStatus::Closed, true);

   assert!(adapter.get().await);
   assert!(adapter.get().await);
   assert_eq!(resource.probes(), 1);
}

#[tokio::test]
async fn test_zero_interval_probes_every_read() {
   let resource = Fake::new(ResourceKind::Statement);
   let adapter = valid_adapter()
      .probe(|r: Arc<Fake>| async move {
         r.probes.fetch_add(1, Ordering::SeqCst);
         Ok(false)
      })
      .build(Arc::downgrade(&resource));

   assert!(!adapter.get().await);
   assert!(!adapter.get().await);
   assert_eq!(resource.probes(), 2);
}

#[tokio::test]
async fn test_set_to_current_value_skips_driver() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = ResourceStatusAdapter::builder(
      ResourceStatus::AutoCommit,
      ResourceStatus::ChangingAutoCommit,
      ResourceStatus::CheckingAutoCommit,
   )
   .probe(|_r: Arc<Fake>| async { Ok(true) })
   .change(|r: Arc<Fake>, _value| async move {
      r.changes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   })
   .build(Arc::downgrade(&resource));

   adapter.set(true).await.unwrap();
   assert_eq!(resource.changes(), 0);
   assert!(adapter.peek());
}

#[tokio::test]
async fn test_set_publishes_and_clears_changing_marker() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = closed_adapter()
      .terminal(true)
      .change(|r: Arc<Fake>, _value| async move {
         assert!(r.is(ResourceStatus::Closing));
         r.changes.fetch_add(1, Ordering::SeqCst);
         Ok(())
      })
      .build(Arc::downgrade(&resource));

   adapter.set(true).await.unwrap();
   assert!(resource.is(ResourceStatus::Closed));
   assert!(!resource.is(ResourceStatus::Closing));

   // terminal and reached: never changed again
   adapter.set(true).await.unwrap();
   adapter.set(false).await.unwrap();
   assert_eq!(resource.changes(), 1);
   assert!(adapter.get().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_set_invokes_driver_once() {
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = Arc::new(
      closed_adapter()
         .terminal(true)
         .change(|r: Arc<Fake>, _value| async move {
            r.changes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
         })
         .build(Arc::downgrade(&resource)),
   );

   let barrier = Arc::new(Barrier::new(8));
   let mut handles = Vec::new();
   for _ in 0..8 {
      let adapter = Arc::clone(&adapter);
      let barrier = Arc::clone(&barrier);
      handles.push(tokio::spawn(async move {
         barrier.wait().await;
         adapter.set(true).await
      }));
   }

   for handle in handles {
      handle.await.unwrap().unwrap();
   }

   assert_eq!(resource.changes(), 1);
   assert!(resource.is(ResourceStatus::Closed));
}

#[tokio::test]
async fn test_hung_change_times_out_within_budget() {
   init_tracing();
   let resource = Fake::new(ResourceKind::Statement);
   let adapter = ResourceStatusAdapter::builder(
      ResourceStatus::Cancelled,
      ResourceStatus::Cancelling,
      ResourceStatus::CheckingCancelled,
   )
   .timing(fast_timing())
   .change(|_r: Arc<Fake>, _value| std::future::pending::<resource_status::Result<()>>())
   .build(Arc::downgrade(&resource));

   let start = Instant::now();
   let err = adapter.set(true).await.unwrap_err();

   assert!(matches!(
      err,
      Error::Timeout {
         kind: ResourceKind::Statement,
         status: ResourceStatus::Cancelled,
         value: true,
         ..
      }
   ));
   assert!(start.elapsed() < Duration::from_secs(2));
   assert!(!resource.is(ResourceStatus::Cancelled));
   assert!(!resource.is(ResourceStatus::Cancelling));
}

#[tokio::test]
async fn test_hung_probe_keeps_last_value() {
   init_tracing();
   let resource = Fake::new(ResourceKind::Connection);
   resource.set(ResourceStatus::Valid, true);

   let adapter = valid_adapter()
      .timing(fast_timing())
      .probe(|_r: Arc<Fake>| std::future::pending::<resource_status::Result<bool>>())
      .build(Arc::downgrade(&resource));

   let start = Instant::now();
   assert!(adapter.get().await);
   assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_failed_probe_retries_after_short_delay() {
   init_tracing();
   let resource = Fake::new(ResourceKind::Connection);
   let adapter = valid_adapter()
      .check_interval(Duration::from_secs(3600))
      .timing(fast_timing())
      .probe(|r: Arc<Fake>| async move {
         if r.probes.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(DriverError::new("busy").into())
         } else {
            Ok(true)
         }
      })
      .build(Arc::downgrade(&resource));

   assert!(!adapter.get().await);
   assert!(!adapter.get().await);
   assert_eq!(resource.probes(), 1);

   tokio::time::sleep(Duration::from_millis(120)).await;
   assert!(adapter.get().await);
   assert_eq!(resource.probes(), 2);
}

#[tokio::test]
async fn test_failed_terminal_change_forces_terminal_state() {
   let resource = Fake::new(ResourceKind::ResultSet);
   let adapter = closed_adapter()
      .terminal(true)
      .change(|_r: Arc<Fake>, _value| async { Err(DriverError::new("close failed").into()) })
      .build(Arc::downgrade(&resource));

   let err = adapter.set(true).await.unwrap_err();
   assert_eq!(err.to_string(), "close failed");
   assert!(resource.is(ResourceStatus::Closed));
}

#[tokio::test]
async fn test_connection_close_outlives_timeout_and_shutdown_waits() {
   init_tracing();
   let resource = Fake::new(ResourceKind::Connection);
   let tasks = BackgroundTasks::new();
   let finished = Arc::new(AtomicBool::new(false));
   let flag = Arc::clone(&finished);

   let adapter = closed_adapter()
      .terminal(true)
      .timing(StatusTiming {
         change_timeout_ms: 20,
         ..Default::default()
      })
      .tasks(tasks.clone())
      .change(move |_r: Arc<Fake>, _value| {
         let flag = Arc::clone(&flag);
         async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
         }
      })
      .build(Arc::downgrade(&resource));

   // timeout on a terminal status is fail-closed
   assert!(matches!(adapter.set(true).await, Err(Error::Timeout { .. })));
   assert!(resource.is(ResourceStatus::Closed));
   assert_eq!(tasks.pending_count(), 1);

   assert!(tasks.shutdown(Duration::from_secs(2)).await);
   assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_statement_work_is_aborted_on_shutdown() {
   let resource = Fake::new(ResourceKind::Statement);
   let tasks = BackgroundTasks::new();
   let adapter = closed_adapter()
      .terminal(true)
      .timing(fast_timing())
      .tasks(tasks.clone())
      .change(|_r: Arc<Fake>, _value| std::future::pending::<resource_status::Result<()>>())
      .build(Arc::downgrade(&resource));

   assert!(adapter.set(true).await.is_err());
   assert_eq!(tasks.daemon_count(), 1);
   assert_eq!(tasks.pending_count(), 0);

   assert!(tasks.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn test_adapter_is_inert_after_resource_drop() {
   let resource = Fake::new(ResourceKind::Connection);
   resource.set(ResourceStatus::Valid, true);
   let adapter = valid_adapter().build(Arc::downgrade(&resource));
   assert!(adapter.get().await);

   drop(resource);
   assert!(!adapter.get().await);
   assert!(adapter.set(true).await.is_ok());
}

#[tokio::test]
async fn test_poller_refreshes_until_terminal() {
   struct Polled {
      statuses: StatusSet,
      probes: AtomicUsize,
      closed: ResourceStatusAdapter<Polled>,
   }

   impl Resource for Polled {
      fn kind(&self) -> ResourceKind {
         ResourceKind::Connection
      }

      fn statuses(&self) -> &StatusSet {
         &self.statuses
      }
   }

   let resource = Arc::new_cyclic(|weak| Polled {
      statuses: StatusSet::new(),
      probes: AtomicUsize::new(0),
      closed: ResourceStatusAdapter::builder(
         ResourceStatus::Closed,
         ResourceStatus::Closing,
         ResourceStatus::CheckingClosed,
      )
      .terminal(true)
      .probe(|r: Arc<Polled>| async move {
         Ok(r.probes.fetch_add(1, Ordering::SeqCst) >= 2)
      })
      .build(weak.clone()),
   });

   let poller = StatusPoller::spawn(&resource, Duration::from_millis(10), |r| &r.closed);

   tokio::time::sleep(Duration::from_millis(300)).await;
   assert!(resource.is(ResourceStatus::Closed));
   assert!(poller.is_finished());
   assert_eq!(resource.probes.load(Ordering::SeqCst), 3);
}
