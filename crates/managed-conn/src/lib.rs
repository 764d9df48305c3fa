//! # managed-conn
//!
//! Managed wrappers around native database driver connections, statements
//! and result sets.
//!
//! Every driver call made through a wrapper runs through the *managed
//! executor* of its connection, which keeps the connection's last access time
//! and ACTIVE status up to date and remembers the first driver failure.
//! Status-affecting operations (close, cancel, auto-commit, read-only,
//! validity) go through [`resource_status::ResourceStatusAdapter`]s and are
//! bounded by timeouts, so a hung driver never blocks a caller indefinitely.
//!
//! Data changes made outside auto-commit mode are recorded in the
//! connection's [`PendingChangeBundle`] until the next commit or rollback.
//!
//! ## Example
//!
//! ```no_run
//! use managed_conn::{ConnectionSettings, ManagedConnection, SqliteDriver};
//! use resource_status::BackgroundTasks;
//!
//! # async fn example() -> managed_conn::Result<()> {
//! let driver = SqliteDriver::open("app.db").await?;
//! let conn = ManagedConnection::new(
//!    "main",
//!    driver,
//!    ConnectionSettings::default(),
//!    BackgroundTasks::new(),
//! );
//!
//! conn.set_auto_commit(false).await?;
//! let stmt = conn.create_statement().await?;
//! stmt.execute_update("INSERT INTO users (name) VALUES ('Alice')").await?;
//! assert!(conn.has_data_changes());
//!
//! conn.commit().await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
#[cfg(feature = "sqlite")]
mod decode;
mod driver;
mod error;
mod pending;
mod result_set;
mod settings;
#[cfg(feature = "sqlite")]
mod sqlite;
mod statement;

pub use connection::ManagedConnection;
#[cfg(feature = "sqlite")]
pub use decode::to_json;
pub use driver::{
   DriverResult, NativeConnection, NativeResultSet, NativeResultSetOf, NativeStatement, Row,
};
pub use error::Error;
pub use pending::{PendingChange, PendingChangeBundle};
pub use result_set::ManagedResultSet;
pub use settings::ConnectionSettings;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDriver, SqliteRows, SqliteStatement};
pub use statement::ManagedStatement;

/// A type alias for Results with managed-conn errors
pub type Result<T> = std::result::Result<T, Error>;
