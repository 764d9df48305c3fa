//! Integration tests for the managed wrappers over real SQLite databases

use managed_conn::{ConnectionSettings, Error, ManagedConnection, SqliteDriver};
use resource_status::BackgroundTasks;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn open(path: &Path) -> Arc<ManagedConnection<SqliteDriver>> {
   let driver = SqliteDriver::open(path).await.unwrap();
   ManagedConnection::new("test", driver, ConnectionSettings::default(), BackgroundTasks::new())
}

async fn count(conn: &ManagedConnection<SqliteDriver>) -> i64 {
   let stmt = conn.create_statement().await.unwrap();
   let rows = stmt
      .execute_query("SELECT COUNT(*) AS n FROM users")
      .await
      .unwrap()
      .rows()
      .await
      .unwrap();
   stmt.close().await.unwrap();
   rows[0]["n"].as_i64().unwrap()
}

async fn create_users(conn: &ManagedConnection<SqliteDriver>) {
   let stmt = conn.create_statement().await.unwrap();
   stmt
      .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, avatar BLOB)")
      .await
      .unwrap();
   stmt.close().await.unwrap();
}

#[tokio::test]
async fn test_query_rows_are_decoded_to_json() {
   let temp_dir = TempDir::new().unwrap();
   let conn = open(&temp_dir.path().join("decode.db")).await;
   create_users(&conn).await;

   let stmt = conn.create_statement().await.unwrap();
   stmt
      .execute_update("INSERT INTO users (id, name, avatar) VALUES (1, 'Alice', x'0102')")
      .await
      .unwrap();

   assert!(stmt.execute("SELECT id, name, avatar FROM users").await.unwrap());
   let rows = stmt.result_set().await.unwrap().unwrap().rows().await.unwrap();

   assert_eq!(rows.len(), 1);
   assert_eq!(rows[0]["id"], JsonValue::from(1));
   assert_eq!(rows[0]["name"], JsonValue::from("Alice"));
   assert_eq!(rows[0]["avatar"], JsonValue::from("AQI="));
}

#[tokio::test]
async fn test_auto_commit_off_rolls_back() {
   let temp_dir = TempDir::new().unwrap();
   let conn = open(&temp_dir.path().join("rollback.db")).await;
   create_users(&conn).await;

   conn.set_auto_commit(false).await.unwrap();
   let stmt = conn.create_statement().await.unwrap();
   stmt
      .execute_update("INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();
   assert!(conn.native().in_transaction());
   assert!(conn.has_data_changes());

   conn.rollback().await.unwrap();
   assert!(!conn.native().in_transaction());
   assert!(!conn.has_data_changes());
   assert_eq!(count(&conn).await, 0);

   conn.close().await.unwrap();
}

#[tokio::test]
async fn test_committed_changes_survive_reopen() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("commit.db");

   let conn = open(&path).await;
   create_users(&conn).await;
   conn.set_auto_commit(false).await.unwrap();

   let stmt = conn.create_statement().await.unwrap();
   let counts = stmt
      .execute_batch(&[
         "INSERT INTO users (name) VALUES ('Alice')".to_string(),
         "INSERT INTO users (name) VALUES ('Bob')".to_string(),
      ])
      .await
      .unwrap();
   assert_eq!(counts, [1, 1]);
   assert_eq!(conn.pending_changes().len(), 2);

   conn.commit().await.unwrap();
   assert!(conn.pending_changes().is_empty());
   conn.close().await.unwrap();

   let reopened = open(&path).await;
   assert_eq!(count(&reopened).await, 2);
   reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_close_discards_uncommitted_changes() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("close.db");

   let conn = open(&path).await;
   create_users(&conn).await;
   conn.set_auto_commit(false).await.unwrap();

   let stmt = conn.create_statement().await.unwrap();
   stmt
      .execute_update("INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();
   conn.close().await.unwrap();
   assert!(conn.is_closed().await);

   let reopened = open(&path).await;
   assert_eq!(count(&reopened).await, 0);
   reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_read_only_rejects_writes() {
   let temp_dir = TempDir::new().unwrap();
   let conn = open(&temp_dir.path().join("readonly.db")).await;
   create_users(&conn).await;

   conn.set_read_only(true).await.unwrap();
   assert!(conn.is_read_only().await);

   let stmt = conn.create_statement().await.unwrap();
   let err = stmt
      .execute_update("INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap_err();
   assert!(err.as_driver_error().is_some());
   assert!(stmt.last_error().is_some());

   conn.set_read_only(false).await.unwrap();
   stmt
      .execute_update("INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();
   assert_eq!(count(&conn).await, 1);
}

#[tokio::test]
async fn test_validity_and_close() {
   let temp_dir = TempDir::new().unwrap();
   let conn = open(&temp_dir.path().join("valid.db")).await;

   assert!(conn.is_valid().await);
   assert!(!conn.is_closed().await);

   conn.close().await.unwrap();
   assert!(conn.is_closed().await);
   assert!(matches!(conn.create_statement().await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_invalid_sql_reports_driver_code() {
   let conn = ManagedConnection::new(
      "memory",
      SqliteDriver::open_in_memory().await.unwrap(),
      ConnectionSettings::default(),
      BackgroundTasks::new(),
   );
   let stmt = conn.create_statement().await.unwrap();

   let err = stmt.execute_query("SELECT * FROM missing").await.unwrap_err();
   assert!(err.error_code().starts_with("DRIVER_"));
   assert!(!conn.is_active());
}
