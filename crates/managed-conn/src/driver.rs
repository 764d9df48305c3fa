//! Contracts of the native driver handles decorated by the managed wrappers
//!
//! The traits mirror a conventional SQL driver surface: a connection creates
//! statements, a statement executes SQL and may produce a result set, and a
//! result set yields rows. Every call may fail with a [`DriverError`] and any
//! call may block for an unbounded time; the managed wrappers are responsible
//! for bounding the calls that affect status.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use resource_status::DriverError;
use serde_json::Value as JsonValue;

/// A decoded row, keyed by column name in column order
pub type Row = IndexMap<String, JsonValue>;

/// Result of a native driver call
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Native result set type produced by the statements of a connection
pub type NativeResultSetOf<C> =
   <<C as NativeConnection>::Statement as NativeStatement>::ResultSet;

pub trait NativeConnection: Send + Sync + 'static {
   type Statement: NativeStatement;

   fn create_statement(&self) -> impl Future<Output = DriverResult<Self::Statement>> + Send;

   /// Commits the current transaction. Does nothing when none is open.
   fn commit(&self) -> impl Future<Output = DriverResult<()>> + Send;

   /// Rolls back the current transaction. Does nothing when none is open.
   fn rollback(&self) -> impl Future<Output = DriverResult<()>> + Send;

   fn close(&self) -> impl Future<Output = DriverResult<()>> + Send;

   fn is_closed(&self) -> impl Future<Output = DriverResult<bool>> + Send;

   /// Checks that the connection still answers within `timeout`.
   fn is_valid(&self, timeout: Duration) -> impl Future<Output = DriverResult<bool>> + Send;

   fn auto_commit(&self) -> impl Future<Output = DriverResult<bool>> + Send;

   /// Switches auto-commit mode. Turning it on commits an open transaction.
   fn set_auto_commit(&self, value: bool) -> impl Future<Output = DriverResult<()>> + Send;

   fn read_only(&self) -> impl Future<Output = DriverResult<bool>> + Send;

   fn set_read_only(&self, value: bool) -> impl Future<Output = DriverResult<()>> + Send;
}

pub trait NativeStatement: Send + Sync + 'static {
   type ResultSet: NativeResultSet;

   /// Executes any statement. Returns `true` if it produced a result set.
   fn execute(&self, sql: &str) -> impl Future<Output = DriverResult<bool>> + Send;

   fn execute_query(
      &self,
      sql: &str,
   ) -> impl Future<Output = DriverResult<Arc<Self::ResultSet>>> + Send;

   /// Executes a data-mutating statement, returning the affected row count.
   fn execute_update(&self, sql: &str) -> impl Future<Output = DriverResult<u64>> + Send;

   /// Executes each statement in order, returning the per-statement counts.
   fn execute_batch(&self, sql: &[String]) -> impl Future<Output = DriverResult<Vec<u64>>> + Send;

   /// The result set produced by the last `execute`, if any.
   ///
   /// Returns the same `Arc` for as long as that result set is current.
   fn result_set(&self) -> impl Future<Output = DriverResult<Option<Arc<Self::ResultSet>>>> + Send;

   fn cancel(&self) -> impl Future<Output = DriverResult<()>> + Send;

   fn close(&self) -> impl Future<Output = DriverResult<()>> + Send;

   fn is_closed(&self) -> impl Future<Output = DriverResult<bool>> + Send;
}

pub trait NativeResultSet: Send + Sync + 'static {
   /// Advances to the next row. `None` once the rows are exhausted.
   fn next(&self) -> impl Future<Output = DriverResult<Option<Row>>> + Send;

   fn close(&self) -> impl Future<Output = DriverResult<()>> + Send;

   fn is_closed(&self) -> impl Future<Output = DriverResult<bool>> + Send;
}
