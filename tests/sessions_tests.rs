//! Integration tests for session bundles and database handles

use std::sync::Arc;
use std::time::Duration;

use conn_sessions::{
   ConnectionId, DatabaseHandle, Error, SessionBundle, SessionId, SessionsState,
};
use managed_conn::{ConnectionSettings, SqliteDriver};
use tempfile::TempDir;
use tokio::sync::Barrier;

fn handle() -> DatabaseHandle<SqliteDriver> {
   DatabaseHandle::new(ConnectionId::new("local"), "Local", ConnectionSettings::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_session_creates_one_session() {
   let bundle = Arc::new(SessionBundle::new(ConnectionId::new("local")));
   let barrier = Arc::new(Barrier::new(8));

   let mut tasks = Vec::new();
   for _ in 0..8 {
      let bundle = Arc::clone(&bundle);
      let barrier = Arc::clone(&barrier);
      tasks.push(tokio::spawn(async move {
         barrier.wait().await;
         bundle.get_session("Reports", true).unwrap()
      }));
   }

   let sessions = futures::future::join_all(tasks).await;
   let first = sessions[0].as_ref().unwrap();
   for session in &sessions {
      assert!(Arc::ptr_eq(first, session.as_ref().unwrap()));
   }
   assert_eq!(bundle.session_names(), ["Main", "Pool", "Reports"]);
}

#[tokio::test]
async fn test_attach_requires_known_session() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();
   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();

   let result = handle.attach(&SessionId::new("missing"), driver).await;
   assert!(matches!(result, Err(Error::SessionNotFound(_))));
}

#[tokio::test]
async fn test_attach_labels_connection_by_session() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();
   let reports = handle.sessions().create_session("Reports");

   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let conn = handle.attach(reports.id(), driver).await.unwrap();

   assert_eq!(conn.label(), "Local/Reports");
   assert!(Arc::ptr_eq(&handle.connection(reports.id()).unwrap(), &conn));
   assert!(Arc::ptr_eq(&handle.session_of(&conn).unwrap(), &reports));
}

#[tokio::test]
async fn test_transactional_connections_exclude_pool() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();
   let reports = handle.sessions().create_session("Reports");

   for (session, file) in [
      (SessionId::MAIN, "main.db"),
      (SessionId::POOL, "pool.db"),
      (reports.id().clone(), "reports.db"),
   ] {
      let driver = SqliteDriver::open(temp_dir.path().join(file)).await.unwrap();
      handle.attach(&session, driver).await.unwrap();
   }

   assert_eq!(handle.connections().len(), 3);
   let labels: Vec<_> = handle
      .transactional_connections()
      .iter()
      .map(|c| c.label().to_string())
      .collect();
   assert_eq!(labels, ["Local/Main", "Local/Reports"]);

   handle.dispose(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_reattach_closes_replaced_connection() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();

   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let first = handle.attach(&SessionId::MAIN, driver).await.unwrap();
   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let second = handle.attach(&SessionId::MAIN, driver).await.unwrap();

   assert!(first.is_closed().await);
   assert!(!second.is_closed().await);
   assert_eq!(handle.connections().len(), 1);
}

#[tokio::test]
async fn test_remove_session_closes_its_connection() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();
   let reports = handle.sessions().create_session("Reports");
   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let conn = handle.attach(reports.id(), driver).await.unwrap();

   handle.remove_session("Reports").await.unwrap();

   assert!(conn.is_closed().await);
   assert!(reports.is_disposed());
   assert!(handle.connection(reports.id()).is_none());
   assert!(matches!(
      handle.remove_session("Main").await,
      Err(Error::ProtectedSession(_))
   ));
}

#[tokio::test]
async fn test_dispose_closes_everything() {
   let temp_dir = TempDir::new().unwrap();
   let handle = handle();
   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let conn = handle.attach(&SessionId::MAIN, driver).await.unwrap();

   assert!(handle.dispose(Duration::from_secs(5)).await);

   assert!(conn.is_closed().await);
   assert!(handle.is_disposed());
   assert!(handle.sessions().main().is_disposed());
   assert!(handle.connections().is_empty());
   assert_eq!(handle.tasks().pending_count(), 0);

   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   assert!(matches!(
      handle.attach(&SessionId::MAIN, driver).await,
      Err(Error::HandleDisposed(_))
   ));
}

#[tokio::test]
async fn test_saved_sessions_can_be_reattached() {
   let temp_dir = TempDir::new().unwrap();
   let before = handle();
   let reports = before.sessions().create_session("Reports");
   let json = SessionsState::capture([before.sessions()]).to_json().unwrap();

   let after = handle();
   let restored = SessionsState::from_json(&json)
      .unwrap()
      .restore(after.sessions())
      .unwrap();
   assert_eq!(restored, 1);

   let driver = SqliteDriver::open(temp_dir.path().join("a.db")).await.unwrap();
   let conn = after.attach(reports.id(), driver).await.unwrap();
   assert_eq!(conn.label(), "Local/Reports");
}
