//! Managed statement wrapper

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use resource_status::{
   DriverError, Resource, ResourceKind, ResourceStatus, ResourceStatusAdapter, StatusSet, publish,
};
use tracing::debug;

use crate::connection::ManagedConnection;
use crate::driver::{NativeConnection, NativeResultSetOf, NativeStatement};
use crate::pending::PendingChange;
use crate::result_set::ManagedResultSet;
use crate::{Error, Result};

/// A native statement whose driver calls run through the managed executor of
/// its connection.
pub struct ManagedStatement<C: NativeConnection> {
   id: u64,
   connection: Arc<ManagedConnection<C>>,
   native: C::Statement,
   statuses: StatusSet,
   closed: ResourceStatusAdapter<Self>,
   cancelled: ResourceStatusAdapter<Self>,
   result_set: Mutex<Option<Weak<ManagedResultSet<C>>>>,
   last_error: Mutex<Option<DriverError>>,
}

impl<C: NativeConnection> ManagedStatement<C> {
   pub(crate) fn new(
      connection: Arc<ManagedConnection<C>>,
      id: u64,
      native: C::Statement,
   ) -> Arc<Self> {
      let timing = connection.settings().timing;
      let tasks = connection.tasks().clone();

      Arc::new_cyclic(|me: &Weak<Self>| {
         let closed = ResourceStatusAdapter::builder(
            ResourceStatus::Closed,
            ResourceStatus::Closing,
            ResourceStatus::CheckingClosed,
         )
         .terminal(true)
         .timing(timing)
         .tasks(tasks.clone())
         .probe(|stmt: Arc<Self>| async move { Ok(stmt.native.is_closed().await?) })
         .change(|stmt: Arc<Self>, _value| async move { Ok(stmt.native.close().await?) })
         .build(me.clone());

         // cleared again by the next execution
         let cancelled = ResourceStatusAdapter::builder(
            ResourceStatus::Cancelled,
            ResourceStatus::Cancelling,
            ResourceStatus::CheckingCancelled,
         )
         .timing(timing)
         .tasks(tasks)
         .change(|stmt: Arc<Self>, value| async move {
            if value {
               stmt.native.cancel().await?;
            }
            Ok(())
         })
         .build(me.clone());

         Self {
            id,
            connection,
            native,
            statuses: StatusSet::new(),
            closed,
            cancelled,
            result_set: Mutex::new(None),
            last_error: Mutex::new(None),
         }
      })
   }

   pub fn id(&self) -> u64 {
      self.id
   }

   pub fn connection(&self) -> &Arc<ManagedConnection<C>> {
      &self.connection
   }

   /// Executes any statement. Returns `true` if it produced a result set,
   /// which is then available through [`result_set`](Self::result_set).
   pub async fn execute(&self, sql: &str) -> Result<bool> {
      self.begin_execution()?;
      self
         .connection
         .managed(&self.last_error, self.native.execute(sql))
         .await
   }

   pub async fn execute_query(&self, sql: &str) -> Result<Arc<ManagedResultSet<C>>> {
      self.begin_execution()?;
      let native = self
         .connection
         .managed(&self.last_error, self.native.execute_query(sql))
         .await?;
      Ok(self.wrap(native))
   }

   /// Executes a data-mutating statement and records it as a pending change
   /// when it touched any rows.
   pub async fn execute_update(&self, sql: &str) -> Result<u64> {
      self.begin_execution()?;
      let rows = self
         .connection
         .managed(&self.last_error, self.native.execute_update(sql))
         .await?;

      if rows > 0 {
         self
            .connection
            .notify_data_change(PendingChange::new(sql, rows))
            .await;
      }
      Ok(rows)
   }

   pub async fn execute_batch(&self, sql: &[String]) -> Result<Vec<u64>> {
      self.begin_execution()?;
      let counts = self
         .connection
         .managed(&self.last_error, self.native.execute_batch(sql))
         .await?;

      for (statement, &rows) in sql.iter().zip(&counts) {
         if rows > 0 {
            self
               .connection
               .notify_data_change(PendingChange::new(statement.as_str(), rows))
               .await;
         }
      }
      Ok(counts)
   }

   /// The current result set, wrapped.
   ///
   /// Returns the same wrapper for as long as the driver reports the same
   /// native result set.
   pub async fn result_set(&self) -> Result<Option<Arc<ManagedResultSet<C>>>> {
      self.ensure_open()?;
      let native = self
         .connection
         .managed(&self.last_error, self.native.result_set())
         .await?;
      Ok(native.map(|native| self.wrap(native)))
   }

   pub async fn cancel(&self) -> Result<()> {
      self.cancelled.set(true).await?;
      Ok(())
   }

   pub fn is_cancelled(&self) -> bool {
      self.cancelled.peek()
   }

   /// Closes the statement and its current result set.
   ///
   /// The statement is released from its connection even if the driver
   /// fails to close it.
   pub async fn close(&self) -> Result<()> {
      let outcome = self.closed.set(true).await;

      let current = self.result_set.lock().take().and_then(|cached| cached.upgrade());
      if let Some(result_set) = current
         && let Err(e) = result_set.close().await
      {
         debug!(statement = self.id, error = %e, "Failed to close result set");
      }

      self.connection.release_statement(self.id);
      outcome.map_err(Error::from)
   }

   pub async fn is_closed(&self) -> bool {
      self.closed.get().await
   }

   /// First driver failure seen by this statement
   pub fn last_error(&self) -> Option<DriverError> {
      self.last_error.lock().clone()
   }

   fn ensure_open(&self) -> Result<()> {
      if self.is(ResourceStatus::Closed) {
         return Err(Error::StatementClosed);
      }
      self.connection.ensure_open()
   }

   fn begin_execution(&self) -> Result<()> {
      self.ensure_open()?;
      publish(self, ResourceStatus::Cancelled, false);
      Ok(())
   }

   fn wrap(&self, native: Arc<NativeResultSetOf<C>>) -> Arc<ManagedResultSet<C>> {
      let mut cached = self.result_set.lock();
      if let Some(existing) = cached.as_ref().and_then(Weak::upgrade)
         && existing.wraps(&native)
      {
         return existing;
      }

      let id = self.connection.next_resource_id();
      let wrapper = ManagedResultSet::new(Arc::clone(&self.connection), id, native);
      self.connection.register_cursor(id, &wrapper);
      *cached = Some(Arc::downgrade(&wrapper));
      wrapper
   }
}

impl<C: NativeConnection> Resource for ManagedStatement<C> {
   fn kind(&self) -> ResourceKind {
      ResourceKind::Statement
   }

   fn statuses(&self) -> &StatusSet {
      &self.statuses
   }
}

impl<C: NativeConnection> std::fmt::Debug for ManagedStatement<C> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ManagedStatement")
         .field("id", &self.id)
         .field("connection", &self.connection.label())
         .field("statuses", &self.statuses)
         .finish()
   }
}
