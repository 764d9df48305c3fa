//! # conn-sessions
//!
//! Named database sessions and transaction handling across the connections
//! of one logical database.
//!
//! A [`DatabaseHandle`] owns a [`SessionBundle`] (the built-in "Main" and
//! "Pool" sessions plus any number of custom ones) and one
//! [`ManagedConnection`](managed_conn::ManagedConnection) per session. The
//! [`TransactionManager`] commits, rolls back, disconnects or toggles
//! auto-commit across those connections and reports what it did per
//! connection.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use conn_sessions::{
//!    ConnectionId, DatabaseHandle, SessionId, TransactionAction, TransactionManager,
//! };
//! use managed_conn::{ConnectionSettings, SqliteDriver};
//!
//! # async fn example() -> conn_sessions::Result<()> {
//! let handle = DatabaseHandle::new(
//!    ConnectionId::new("local"),
//!    "Local database",
//!    ConnectionSettings::default(),
//! );
//!
//! let main = handle
//!    .attach(&SessionId::MAIN, SqliteDriver::open("app.db").await?)
//!    .await?;
//! main.set_auto_commit(false).await?;
//!
//! let stmt = main.create_statement().await?;
//! stmt.execute_update("UPDATE users SET active = 0").await?;
//!
//! let manager = TransactionManager::default();
//! for pending in manager.pending_transactions(&handle) {
//!    println!("{} change(s) on {}", pending.changes.len(), pending.connection.label());
//! }
//! manager.execute(&handle, None, &[TransactionAction::Commit]).await;
//!
//! handle.dispose(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

mod bundle;
mod config;
mod error;
mod handle;
mod session;
mod transactions;

pub use bundle::SessionBundle;
pub use config::{ConnectionSessions, SessionRecord, SessionsState};
pub use error::{Error, Result};
pub use handle::DatabaseHandle;
pub use session::{ConnectionId, DatabaseSession, SessionId};
pub use transactions::{
   ActionOutcome, PendingChangesOption, PendingTransaction, TransactionAction, TransactionEvent,
   TransactionManager,
};

pub use managed_conn;
pub use resource_status;
