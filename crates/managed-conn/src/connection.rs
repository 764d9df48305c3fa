//! Managed connection wrapper and the managed executor

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use resource_status::{
   BackgroundTasks, Bounded, DriverError, Resource, ResourceKind, ResourceStatus,
   ResourceStatusAdapter, StatusGuard, StatusPoller, StatusSet, TaskMode, publish, run_bounded,
};
use tracing::{debug, trace, warn};

use crate::driver::{DriverResult, NativeConnection};
use crate::pending::{PendingChange, PendingChangeBundle};
use crate::result_set::ManagedResultSet;
use crate::settings::ConnectionSettings;
use crate::statement::ManagedStatement;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionEnd {
   Commit,
   Rollback,
}

/// A native connection decorated with status tracking and activity bookkeeping.
///
/// Owns its native handle exclusively. Statements and result sets created
/// through it keep it alive; it only tracks them weakly.
pub struct ManagedConnection<C: NativeConnection> {
   me: Weak<Self>,
   label: String,
   native: C,
   statuses: StatusSet,
   closed: ResourceStatusAdapter<Self>,
   valid: ResourceStatusAdapter<Self>,
   auto_commit: ResourceStatusAdapter<Self>,
   read_only: ResourceStatusAdapter<Self>,
   settings: ConnectionSettings,
   tasks: BackgroundTasks,
   last_access: Mutex<Instant>,
   /// Number of managed calls currently running
   active_depth: Mutex<usize>,
   next_resource_id: AtomicU64,
   statements: Mutex<HashMap<u64, Weak<ManagedStatement<C>>>>,
   cursors: Mutex<HashMap<u64, Weak<ManagedResultSet<C>>>>,
   pending: PendingChangeBundle,
   last_error: Mutex<Option<DriverError>>,
}

impl<C: NativeConnection> ManagedConnection<C> {
   pub fn new(
      label: impl Into<String>,
      native: C,
      settings: ConnectionSettings,
      tasks: BackgroundTasks,
   ) -> Arc<Self> {
      let label = label.into();
      let timing = settings.timing;
      let validation_timeout = settings.validation_timeout();

      Arc::new_cyclic(|me: &Weak<Self>| {
         let closed = ResourceStatusAdapter::builder(
            ResourceStatus::Closed,
            ResourceStatus::Closing,
            ResourceStatus::CheckingClosed,
         )
         .terminal(true)
         .check_interval(settings.closed_check_interval())
         .timing(timing)
         .tasks(tasks.clone())
         .probe(|conn: Arc<Self>| async move { Ok(conn.native.is_closed().await?) })
         .change(|conn: Arc<Self>, _value| async move { conn.close_native().await })
         .build(me.clone());

         // an ACTIVE connection is busy talking to the server, so it is valid
         let valid = ResourceStatusAdapter::builder(
            ResourceStatus::Valid,
            ResourceStatus::ChangingValid,
            ResourceStatus::CheckingValid,
         )
         .check_interval(settings.valid_check_interval())
         .timing(timing)
         .tasks(tasks.clone())
         .probe(move |conn: Arc<Self>| async move {
            if conn.is(ResourceStatus::Active) {
               return Ok(true);
            }
            Ok(conn.native.is_valid(validation_timeout).await?)
         })
         .build(me.clone());

         let auto_commit = ResourceStatusAdapter::builder(
            ResourceStatus::AutoCommit,
            ResourceStatus::ChangingAutoCommit,
            ResourceStatus::CheckingAutoCommit,
         )
         .check_interval(settings.auto_commit_check_interval())
         .timing(timing)
         .tasks(tasks.clone())
         .probe(|conn: Arc<Self>| async move { Ok(conn.native.auto_commit().await?) })
         .change(|conn: Arc<Self>, value| async move {
            conn.native.set_auto_commit(value).await?;
            if value {
               // the driver committed whatever was open
               conn.pending.clear();
            }
            Ok(())
         })
         .build(me.clone());

         let read_only = ResourceStatusAdapter::builder(
            ResourceStatus::ReadOnly,
            ResourceStatus::ChangingReadOnly,
            ResourceStatus::CheckingReadOnly,
         )
         .check_interval(settings.read_only_check_interval())
         .timing(timing)
         .tasks(tasks.clone())
         .probe(|conn: Arc<Self>| async move { Ok(conn.native.read_only().await?) })
         .change(|conn: Arc<Self>, value| async move {
            Ok(conn.native.set_read_only(value).await?)
         })
         .build(me.clone());

         Self {
            me: me.clone(),
            label,
            native,
            statuses: StatusSet::new(),
            closed,
            valid,
            auto_commit,
            read_only,
            settings,
            tasks,
            last_access: Mutex::new(Instant::now()),
            active_depth: Mutex::new(0),
            next_resource_id: AtomicU64::new(1),
            statements: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            pending: PendingChangeBundle::new(),
            last_error: Mutex::new(None),
         }
      })
   }

   pub fn label(&self) -> &str {
      &self.label
   }

   pub fn native(&self) -> &C {
      &self.native
   }

   pub fn settings(&self) -> &ConnectionSettings {
      &self.settings
   }

   pub fn tasks(&self) -> &BackgroundTasks {
      &self.tasks
   }

   /// Whether the connection is closed.
   ///
   /// While an operation is running on the connection the last known value
   /// is returned instead of probing the busy driver.
   pub async fn is_closed(&self) -> bool {
      if self.is(ResourceStatus::Active) {
         return self.is(ResourceStatus::Closed);
      }
      self.closed.get().await
   }

   pub async fn is_valid(&self) -> bool {
      self.valid.get().await
   }

   /// Starts re-checking validity in the background every
   /// `valid_check_interval`, so [`Resource::is`] on VALID reflects a lost
   /// server without anyone calling [`is_valid`](Self::is_valid).
   ///
   /// Returns `None` when the interval is zero. The poller stops when it is
   /// dropped or the connection is gone.
   pub fn watch_validity(self: &Arc<Self>) -> Option<StatusPoller> {
      let period = self.settings.valid_check_interval();
      if period.is_zero() {
         return None;
      }
      debug!(connection = %self.label, ?period, "Watching connection validity");
      Some(StatusPoller::spawn(self, period, valid_adapter))
   }

   pub async fn is_auto_commit(&self) -> bool {
      self.auto_commit.get().await
   }

   pub async fn set_auto_commit(&self, value: bool) -> Result<()> {
      self.auto_commit.set(value).await?;
      Ok(())
   }

   pub async fn is_read_only(&self) -> bool {
      self.read_only.get().await
   }

   pub async fn set_read_only(&self, value: bool) -> Result<()> {
      self.read_only.set(value).await?;
      Ok(())
   }

   pub fn is_active(&self) -> bool {
      self.is(ResourceStatus::Active)
   }

   pub fn is_reserved(&self) -> bool {
      self.is(ResourceStatus::Reserved)
   }

   /// Closes the connection and every statement and result set created
   /// through it.
   ///
   /// Rolls back first when not in auto-commit mode. The native close keeps
   /// running in the background if it exceeds its time budget, and the
   /// connection is considered closed either way.
   pub async fn close(&self) -> Result<()> {
      let outcome = self.closed.set(true).await;

      let statements: Vec<_> = self
         .statements
         .lock()
         .drain()
         .filter_map(|(_, statement)| statement.upgrade())
         .collect();
      for statement in statements {
         if let Err(e) = statement.close().await {
            debug!(connection = %self.label, error = %e, "Failed to close statement");
         }
      }

      let cursors: Vec<_> = self
         .cursors
         .lock()
         .drain()
         .filter_map(|(_, cursor)| cursor.upgrade())
         .collect();
      for cursor in cursors {
         if let Err(e) = cursor.close().await {
            debug!(connection = %self.label, error = %e, "Failed to close result set");
         }
      }

      let discarded = self.pending.clear();
      if discarded > 0 {
         debug!(connection = %self.label, "Discarded {} pending change(s) on close", discarded);
      }

      self.update_last_access();
      outcome.map_err(Error::from)
   }

   /// Commits the current transaction. Does nothing in auto-commit mode.
   pub async fn commit(&self) -> Result<()> {
      self.end_transaction(TransactionEnd::Commit).await
   }

   /// Rolls back the current transaction. Does nothing in auto-commit mode.
   pub async fn rollback(&self) -> Result<()> {
      self.end_transaction(TransactionEnd::Rollback).await
   }

   async fn end_transaction(&self, end: TransactionEnd) -> Result<()> {
      self.ensure_open()?;
      if self.auto_commit.get().await {
         return Ok(());
      }

      let marker = match end {
         TransactionEnd::Commit => ResourceStatus::Committing,
         TransactionEnd::Rollback => ResourceStatus::RollingBack,
      };
      if !Resource::set(self, marker, true) {
         trace!(connection = %self.label, status = %marker, "Transaction end already in progress");
         return Ok(());
      }
      let _marker = StatusGuard::raise(self, marker);

      let me = self.me.upgrade().ok_or(Error::ConnectionReleased)?;
      let work = async move {
         match end {
            TransactionEnd::Commit => me.native.commit().await,
            TransactionEnd::Rollback => me.native.rollback().await,
         }
      };

      let timeout = self.settings.timing.change_timeout();
      match run_bounded(&self.tasks, TaskMode::NonDaemon, timeout, work).await? {
         Bounded::Completed(Ok(())) => {
            let count = self.pending.clear();
            debug!(connection = %self.label, ?end, "Transaction ended, {} change(s) settled", count);
            self.update_last_access();
            Ok(())
         }
         Bounded::Completed(Err(e)) if e.is_connection_lost() => {
            warn!(connection = %self.label, ?end, error = %e, "Connection lost, marking it closed");
            self.capture(&self.last_error, &e);
            self.mark_closed();
            Ok(())
         }
         Bounded::Completed(Err(e)) => {
            self.capture(&self.last_error, &e);
            Err(e.into())
         }
         Bounded::TimedOut => Err(Error::Status(resource_status::Error::Timeout {
            kind: ResourceKind::Connection,
            status: marker,
            value: true,
            timeout,
         })),
      }
   }

   /// Marks the connection as closed without talking to the driver.
   pub fn mark_closed(&self) {
      publish(self, ResourceStatus::Valid, false);
      publish(self, ResourceStatus::Active, false);
      publish(self, ResourceStatus::Closed, true);
   }

   /// Reserves the connection for exclusive use by one caller.
   pub fn reserve(&self) {
      if self.is(ResourceStatus::Reserved) {
         warn!(connection = %self.label, "Connection is already reserved");
      } else if self.is(ResourceStatus::Active) {
         warn!(connection = %self.label, "Reserving a connection that is active");
      }
      Resource::set(self, ResourceStatus::Reserved, true);
   }

   pub fn release_reservation(&self) {
      Resource::set(self, ResourceStatus::Reserved, false);
   }

   /// Neither running an operation nor reserved.
   pub fn is_idle(&self) -> bool {
      !self.is(ResourceStatus::Active) && !self.is(ResourceStatus::Reserved)
   }

   /// Marks the connection as used now, postponing idle handling.
   pub fn update_last_access(&self) {
      *self.last_access.lock() = Instant::now();
   }

   pub fn last_access(&self) -> Instant {
      *self.last_access.lock()
   }

   pub fn idle_for(&self) -> Duration {
      self.last_access().elapsed()
   }

   pub fn active_statement_count(&self) -> usize {
      live_count(&self.statements.lock())
   }

   pub fn active_cursor_count(&self) -> usize {
      live_count(&self.cursors.lock())
   }

   /// Records an uncommitted change. Ignored in auto-commit mode.
   ///
   /// Returns `true` if the change was recorded.
   pub async fn notify_data_change(&self, change: PendingChange) -> bool {
      if self.auto_commit.get().await {
         return false;
      }
      trace!(connection = %self.label, sql = %change.sql, "Recording pending change");
      self.pending.record(change);
      true
   }

   pub fn has_data_changes(&self) -> bool {
      !self.is(ResourceStatus::Closed) && !self.pending.is_empty()
   }

   pub fn pending_changes(&self) -> &PendingChangeBundle {
      &self.pending
   }

   /// First driver failure seen by an operation of the connection itself
   pub fn last_error(&self) -> Option<DriverError> {
      self.last_error.lock().clone()
   }

   pub async fn create_statement(&self) -> Result<Arc<ManagedStatement<C>>> {
      self.ensure_open()?;
      let me = self.me.upgrade().ok_or(Error::ConnectionReleased)?;

      let native = self.managed(&self.last_error, self.native.create_statement()).await?;
      let id = self.next_resource_id();
      let statement = ManagedStatement::new(me, id, native);
      self.statements.lock().insert(id, Arc::downgrade(&statement));

      Ok(statement)
   }

   /// Runs one driver call on behalf of this connection or one of its
   /// statements and result sets.
   ///
   /// Updates the last access time before and after the call and keeps the
   /// connection ACTIVE until the last of any overlapping calls finishes. The first failure is remembered in `errors`.
   pub(crate) async fn managed<T>(
      &self,
      errors: &Mutex<Option<DriverError>>,
      work: impl Future<Output = DriverResult<T>>,
   ) -> Result<T> {
      let outcome = {
         let _active = ActiveScope::enter(self);
         work.await
      };

      outcome.map_err(|e| {
         self.capture(errors, &e);
         if e.is_connection_lost() {
            warn!(connection = %self.label, error = %e, "Connection lost, marking it closed");
            self.mark_closed();
         }
         e.into()
      })
   }

   pub(crate) fn ensure_open(&self) -> Result<()> {
      if self.is(ResourceStatus::Closed) {
         return Err(Error::ConnectionClosed);
      }
      Ok(())
   }

   pub(crate) fn next_resource_id(&self) -> u64 {
      self.next_resource_id.fetch_add(1, Ordering::Relaxed)
   }

   pub(crate) fn register_cursor(&self, id: u64, cursor: &Arc<ManagedResultSet<C>>) {
      self.cursors.lock().insert(id, Arc::downgrade(cursor));
   }

   pub(crate) fn release_statement(&self, id: u64) {
      self.statements.lock().remove(&id);
   }

   pub(crate) fn release_cursor(&self, id: u64) {
      self.cursors.lock().remove(&id);
   }

   fn capture(&self, errors: &Mutex<Option<DriverError>>, e: &DriverError) {
      let mut first = errors.lock();
      if first.is_none() {
         *first = Some(e.clone());
      }
   }

   async fn close_native(&self) -> resource_status::Result<()> {
      if !self.auto_commit.get().await
         && let Err(e) = self.native.rollback().await
      {
         warn!(connection = %self.label, error = %e, "Rollback before close failed");
      }
      self.native.close().await?;
      Ok(())
   }
}

impl<C: NativeConnection> Resource for ManagedConnection<C> {
   fn kind(&self) -> ResourceKind {
      ResourceKind::Connection
   }

   fn statuses(&self) -> &StatusSet {
      &self.statuses
   }

   fn status_changed(&self, status: ResourceStatus) {
      let value = self.is(status);
      trace!(connection = %self.label, %status, value, "Connection status changed");
      if status == ResourceStatus::Closed && value {
         debug!(connection = %self.label, "Connection closed");
      }
   }
}

impl<C: NativeConnection> std::fmt::Debug for ManagedConnection<C> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ManagedConnection")
         .field("label", &self.label)
         .field("statuses", &self.statuses)
         .field("pending", &self.pending.len())
         .finish()
   }
}

fn valid_adapter<C: NativeConnection>(
   conn: &ManagedConnection<C>,
) -> &ResourceStatusAdapter<ManagedConnection<C>> {
   &conn.valid
}

/// Keeps a connection ACTIVE for the duration of one managed call.
///
/// Calls may nest or interleave; ACTIVE is cleared when the last one ends.
struct ActiveScope<'a, C: NativeConnection> {
   connection: &'a ManagedConnection<C>,
}

impl<'a, C: NativeConnection> ActiveScope<'a, C> {
   fn enter(connection: &'a ManagedConnection<C>) -> Self {
      connection.update_last_access();
      let mut depth = connection.active_depth.lock();
      if *depth > 0 {
         warn!(
            connection = %connection.label,
            depth = *depth,
            "Connection is already active, operations are overlapping on one driver handle"
         );
      }
      *depth += 1;
      Resource::set(connection, ResourceStatus::Active, true);
      drop(depth);
      Self { connection }
   }
}

impl<C: NativeConnection> Drop for ActiveScope<'_, C> {
   fn drop(&mut self) {
      {
         let mut depth = self.connection.active_depth.lock();
         *depth = depth.saturating_sub(1);
         if *depth == 0 {
            Resource::set(self.connection, ResourceStatus::Active, false);
         }
      }
      self.connection.update_last_access();
   }
}

fn live_count<T>(tracked: &HashMap<u64, Weak<T>>) -> usize {
   tracked.values().filter(|w| w.strong_count() > 0).count()
}
