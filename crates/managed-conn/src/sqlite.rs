//! SQLite implementation of the native driver traits, backed by sqlx
//!
//! Follows conventional driver semantics on top of a single
//! [`SqliteConnection`]: auto-commit is on by default, and with auto-commit
//! off a transaction is opened lazily before the first statement and ended by
//! `commit`/`rollback`. Read-only mode maps to `PRAGMA query_only`.

use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use resource_status::DriverError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::Result;
use crate::decode::decode_rows;
use crate::driver::{DriverResult, NativeConnection, NativeResultSet, NativeStatement, Row};

/// A single SQLite connection.
pub struct SqliteDriver {
   shared: Arc<Shared>,
}

struct Shared {
   /// `None` once closed
   conn: Mutex<Option<SqliteConnection>>,
   auto_commit: AtomicBool,
   in_transaction: AtomicBool,
}

impl SqliteDriver {
   /// Opens (creating if missing) the database file at `path`.
   pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true);
      Self::connect_with(options).await
   }

   /// Opens a private in-memory database.
   pub async fn open_in_memory() -> Result<Self> {
      Self::connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?).await
   }

   pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
      let conn = options.connect().await?;
      Ok(Self {
         shared: Arc::new(Shared {
            conn: Mutex::new(Some(conn)),
            auto_commit: AtomicBool::new(true),
            in_transaction: AtomicBool::new(false),
         }),
      })
   }

   /// Whether a transaction is currently open on the connection
   pub fn in_transaction(&self) -> bool {
      self.shared.in_transaction.load(Ordering::SeqCst)
   }
}

impl Shared {
   async fn lock(&self) -> MutexGuard<'_, Option<SqliteConnection>> {
      self.conn.lock().await
   }

   async fn begin_if_needed(&self, conn: &mut SqliteConnection) -> DriverResult<()> {
      if self.auto_commit.load(Ordering::SeqCst) || self.in_transaction.load(Ordering::SeqCst) {
         return Ok(());
      }

      sqlx::query("BEGIN")
         .execute(&mut *conn)
         .await
         .map_err(driver_error)?;
      self.in_transaction.store(true, Ordering::SeqCst);
      trace!("Opened transaction");
      Ok(())
   }

   async fn end_transaction(&self, sql: &'static str) -> DriverResult<()> {
      let mut guard = self.lock().await;
      let conn = open_connection(&mut guard)?;
      if !self.in_transaction.load(Ordering::SeqCst) {
         return Ok(());
      }

      sqlx::query(sql)
         .execute(&mut *conn)
         .await
         .map_err(driver_error)?;
      self.in_transaction.store(false, Ordering::SeqCst);
      trace!("{} executed", sql);
      Ok(())
   }

   async fn fetch(&self, sql: &str) -> DriverResult<Vec<Row>> {
      let mut guard = self.lock().await;
      let conn = open_connection(&mut guard)?;
      self.begin_if_needed(conn).await?;

      let rows = sqlx::query(sql)
         .fetch_all(&mut *conn)
         .await
         .map_err(driver_error)?;
      decode_rows(rows).map_err(|e| DriverError::new(e.to_string()).with_code(e.error_code()))
   }

   async fn update(&self, sql: &[String]) -> DriverResult<Vec<u64>> {
      let mut guard = self.lock().await;
      let conn = open_connection(&mut guard)?;
      self.begin_if_needed(conn).await?;

      let mut counts = Vec::with_capacity(sql.len());
      for statement in sql {
         let result = sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(driver_error)?;
         counts.push(result.rows_affected());
      }
      Ok(counts)
   }
}

impl NativeConnection for SqliteDriver {
   type Statement = SqliteStatement;

   async fn create_statement(&self) -> DriverResult<SqliteStatement> {
      let mut guard = self.shared.lock().await;
      open_connection(&mut guard)?;
      Ok(SqliteStatement {
         shared: Arc::clone(&self.shared),
         current: parking_lot::Mutex::new(None),
         closed: AtomicBool::new(false),
      })
   }

   async fn commit(&self) -> DriverResult<()> {
      self.shared.end_transaction("COMMIT").await
   }

   async fn rollback(&self) -> DriverResult<()> {
      self.shared.end_transaction("ROLLBACK").await
   }

   async fn close(&self) -> DriverResult<()> {
      let conn = self.shared.lock().await.take();
      if let Some(conn) = conn {
         // an open transaction is rolled back by SQLite
         self.shared.in_transaction.store(false, Ordering::SeqCst);
         conn.close().await.map_err(driver_error)?;
         debug!("SQLite connection closed");
      }
      Ok(())
   }

   async fn is_closed(&self) -> DriverResult<bool> {
      Ok(self.shared.lock().await.is_none())
   }

   async fn is_valid(&self, timeout: Duration) -> DriverResult<bool> {
      let ping = async {
         let mut guard = self.shared.lock().await;
         match guard.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
         }
      };
      Ok(tokio::time::timeout(timeout, ping).await.unwrap_or(false))
   }

   async fn auto_commit(&self) -> DriverResult<bool> {
      Ok(self.shared.auto_commit.load(Ordering::SeqCst))
   }

   async fn set_auto_commit(&self, value: bool) -> DriverResult<()> {
      if value {
         self.shared.end_transaction("COMMIT").await?;
      }
      self.shared.auto_commit.store(value, Ordering::SeqCst);
      Ok(())
   }

   async fn read_only(&self) -> DriverResult<bool> {
      let mut guard = self.shared.lock().await;
      let conn = open_connection(&mut guard)?;
      let query_only: i64 = sqlx::query_scalar("PRAGMA query_only")
         .fetch_one(&mut *conn)
         .await
         .map_err(driver_error)?;
      Ok(query_only != 0)
   }

   async fn set_read_only(&self, value: bool) -> DriverResult<()> {
      let sql = if value {
         "PRAGMA query_only = ON"
      } else {
         "PRAGMA query_only = OFF"
      };

      let mut guard = self.shared.lock().await;
      let conn = open_connection(&mut guard)?;
      sqlx::query(sql)
         .execute(&mut *conn)
         .await
         .map_err(driver_error)?;
      Ok(())
   }
}

/// A statement on a [`SqliteDriver`] connection.
pub struct SqliteStatement {
   shared: Arc<Shared>,
   current: parking_lot::Mutex<Option<Arc<SqliteRows>>>,
   closed: AtomicBool,
}

impl SqliteStatement {
   fn ensure_open(&self) -> DriverResult<()> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(DriverError::new("statement is closed"));
      }
      Ok(())
   }

   fn replace_current(&self, rows: Option<Vec<Row>>) -> Option<Arc<SqliteRows>> {
      let rows = rows.map(|rows| Arc::new(SqliteRows::new(rows)));
      *self.current.lock() = rows.clone();
      rows
   }
}

impl NativeStatement for SqliteStatement {
   type ResultSet = SqliteRows;

   async fn execute(&self, sql: &str) -> DriverResult<bool> {
      self.ensure_open()?;
      if returns_rows(sql) {
         let rows = self.shared.fetch(sql).await?;
         self.replace_current(Some(rows));
         Ok(true)
      } else {
         self.shared.update(&[sql.to_string()]).await?;
         self.replace_current(None);
         Ok(false)
      }
   }

   async fn execute_query(&self, sql: &str) -> DriverResult<Arc<SqliteRows>> {
      self.ensure_open()?;
      let rows = self.shared.fetch(sql).await?;
      let rows = Arc::new(SqliteRows::new(rows));
      *self.current.lock() = Some(Arc::clone(&rows));
      Ok(rows)
   }

   async fn execute_update(&self, sql: &str) -> DriverResult<u64> {
      self.ensure_open()?;
      let counts = self.shared.update(&[sql.to_string()]).await?;
      self.replace_current(None);
      Ok(counts.into_iter().sum())
   }

   async fn execute_batch(&self, sql: &[String]) -> DriverResult<Vec<u64>> {
      self.ensure_open()?;
      let counts = self.shared.update(sql).await?;
      self.replace_current(None);
      Ok(counts)
   }

   async fn result_set(&self) -> DriverResult<Option<Arc<SqliteRows>>> {
      Ok(self.current.lock().clone())
   }

   async fn cancel(&self) -> DriverResult<()> {
      // sqlx offers no interrupt for a running SQLite statement
      trace!("Cancel requested for SQLite statement");
      Ok(())
   }

   async fn close(&self) -> DriverResult<()> {
      self.closed.store(true, Ordering::SeqCst);
      self.current.lock().take();
      Ok(())
   }

   async fn is_closed(&self) -> DriverResult<bool> {
      Ok(self.closed.load(Ordering::SeqCst))
   }
}

/// Fully fetched rows of one query.
pub struct SqliteRows {
   rows: parking_lot::Mutex<VecDeque<Row>>,
   closed: AtomicBool,
}

impl SqliteRows {
   fn new(rows: Vec<Row>) -> Self {
      Self {
         rows: parking_lot::Mutex::new(rows.into()),
         closed: AtomicBool::new(false),
      }
   }
}

impl NativeResultSet for SqliteRows {
   async fn next(&self) -> DriverResult<Option<Row>> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(DriverError::new("result set is closed"));
      }
      Ok(self.rows.lock().pop_front())
   }

   async fn close(&self) -> DriverResult<()> {
      self.closed.store(true, Ordering::SeqCst);
      self.rows.lock().clear();
      Ok(())
   }

   async fn is_closed(&self) -> DriverResult<bool> {
      Ok(self.closed.load(Ordering::SeqCst))
   }
}

fn open_connection<'a>(
   guard: &'a mut MutexGuard<'_, Option<SqliteConnection>>,
) -> DriverResult<&'a mut SqliteConnection> {
   guard
      .as_mut()
      .ok_or_else(|| DriverError::connection_lost("connection is closed"))
}

/// Maps a sqlx failure onto the driver error model.
pub(crate) fn driver_error(e: sqlx::Error) -> DriverError {
   match &e {
      sqlx::Error::Database(db) => {
         let error = DriverError::new(db.message());
         match db.code() {
            Some(code) => error.with_code(code),
            None => error,
         }
      }
      sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => {
         DriverError::connection_lost(e.to_string())
      }
      _ => DriverError::new(e.to_string()),
   }
}

/// Whether a statement produces rows.
///
/// Leading keyword decides for queries; anything else produces rows only
/// with a RETURNING clause.
pub(crate) fn returns_rows(sql: &str) -> bool {
   let Some(first) = sql.split_whitespace().next() else {
      return false;
   };
   let keyword = first
      .split(|c: char| !c.is_ascii_alphabetic())
      .next()
      .unwrap_or_default()
      .to_ascii_uppercase();

   match keyword.as_str() {
      "SELECT" | "WITH" | "VALUES" | "EXPLAIN" => true,
      "PRAGMA" => !sql.contains('='),
      _ => sql
         .split(|c: char| c.is_whitespace() || c == ')' || c == '(')
         .any(|w| w.eq_ignore_ascii_case("RETURNING")),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_returns_rows() {
      assert!(returns_rows("SELECT * FROM t"));
      assert!(returns_rows("  select 1"));
      assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
      assert!(returns_rows("PRAGMA query_only"));
      assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
      assert!(returns_rows("DELETE FROM t WHERE id = 1 RETURNING *"));

      assert!(!returns_rows("PRAGMA query_only = ON"));
      assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
      assert!(!returns_rows("CREATE TABLE returning_things (id INTEGER)"));
      assert!(!returns_rows(""));
   }

   #[test]
   fn test_io_failures_mean_connection_lost() {
      let lost = driver_error(sqlx::Error::Io(std::io::Error::other("broken pipe")));
      assert!(lost.is_connection_lost());

      let other = driver_error(sqlx::Error::RowNotFound);
      assert!(!other.is_connection_lost());
   }
}
