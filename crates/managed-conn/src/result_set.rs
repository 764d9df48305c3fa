//! Managed result-set wrapper

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use resource_status::{
   DriverError, Resource, ResourceKind, ResourceStatus, ResourceStatusAdapter, StatusSet,
};

use crate::connection::ManagedConnection;
use crate::driver::{NativeConnection, NativeResultSet, NativeResultSetOf, Row};
use crate::{Error, Result};

pub struct ManagedResultSet<C: NativeConnection> {
   id: u64,
   connection: Arc<ManagedConnection<C>>,
   native: Arc<NativeResultSetOf<C>>,
   statuses: StatusSet,
   closed: ResourceStatusAdapter<Self>,
   last_error: Mutex<Option<DriverError>>,
}

impl<C: NativeConnection> ManagedResultSet<C> {
   pub(crate) fn new(
      connection: Arc<ManagedConnection<C>>,
      id: u64,
      native: Arc<NativeResultSetOf<C>>,
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
         .tasks(tasks)
         .probe(|rs: Arc<Self>| async move { Ok(rs.native.is_closed().await?) })
         .change(|rs: Arc<Self>, _value| async move { Ok(rs.native.close().await?) })
         .build(me.clone());

         Self {
            id,
            connection,
            native,
            statuses: StatusSet::new(),
            closed,
            last_error: Mutex::new(None),
         }
      })
   }

   pub fn id(&self) -> u64 {
      self.id
   }

   /// Advances to the next row. `None` once the rows are exhausted.
   pub async fn next(&self) -> Result<Option<Row>> {
      if self.is(ResourceStatus::Closed) {
         return Err(Error::ResultSetClosed);
      }
      self
         .connection
         .managed(&self.last_error, self.native.next())
         .await
   }

   /// Collects every remaining row.
   pub async fn rows(&self) -> Result<Vec<Row>> {
      let mut rows = Vec::new();
      while let Some(row) = self.next().await? {
         rows.push(row);
      }
      Ok(rows)
   }

   pub async fn close(&self) -> Result<()> {
      let outcome = self.closed.set(true).await;
      self.connection.release_cursor(self.id);
      outcome.map_err(Error::from)
   }

   pub async fn is_closed(&self) -> bool {
      self.closed.get().await
   }

   /// First driver failure seen by this result set
   pub fn last_error(&self) -> Option<DriverError> {
      self.last_error.lock().clone()
   }

   pub(crate) fn wraps(&self, native: &Arc<NativeResultSetOf<C>>) -> bool {
      Arc::ptr_eq(&self.native, native)
   }
}

impl<C: NativeConnection> Resource for ManagedResultSet<C> {
   fn kind(&self) -> ResourceKind {
      ResourceKind::ResultSet
   }

   fn statuses(&self) -> &StatusSet {
      &self.statuses
   }
}

impl<C: NativeConnection> std::fmt::Debug for ManagedResultSet<C> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("ManagedResultSet")
         .field("id", &self.id)
         .field("statuses", &self.statuses)
         .finish()
   }
}
