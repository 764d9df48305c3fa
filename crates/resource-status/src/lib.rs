//! # resource-status
//!
//! Status bookkeeping for database driver resources (connections, statements
//! and result sets) whose driver calls may block or hang.
//!
//! Every resource carries a lock-free [`StatusSet`] of named flags. Each
//! externally meaningful flag (CLOSED, VALID, AUTO_COMMIT, ...) is owned by a
//! [`ResourceStatusAdapter`], which serializes probes and transitions for that
//! flag, bounds every driver call by a timeout, and applies a failure policy
//! when the driver misbehaves.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resource_status::{
//!    Resource, ResourceKind, ResourceStatus, ResourceStatusAdapter, StatusSet,
//! };
//!
//! struct Cursor {
//!    statuses: StatusSet,
//! }
//!
//! impl Resource for Cursor {
//!    fn kind(&self) -> ResourceKind {
//!       ResourceKind::ResultSet
//!    }
//!
//!    fn statuses(&self) -> &StatusSet {
//!       &self.statuses
//!    }
//! }
//!
//! # async fn example() -> resource_status::Result<()> {
//! let cursor = Arc::new(Cursor { statuses: StatusSet::new() });
//! let closed = ResourceStatusAdapter::builder(
//!    ResourceStatus::Closed,
//!    ResourceStatus::Closing,
//!    ResourceStatus::CheckingClosed,
//! )
//! .terminal(true)
//! .change(|_cursor, _value| async { Ok(()) })
//! .build(Arc::downgrade(&cursor));
//!
//! closed.set(true).await?;
//! assert!(closed.get().await);
//! # Ok(())
//! # }
//! ```
//!
//! ## Periodic refresh
//!
//! An adapter only probes when it is read. A status that should stay fresh
//! without readers is kept so by a [`StatusPoller`], which is always started
//! explicitly by whoever owns the resource.

mod adapter;
mod bounded;
mod config;
mod error;
mod poller;
mod resource;
mod status;
mod tasks;

pub use adapter::{
   ChangeFn, FailureAction, ProbeFn, ResourceStatusAdapter, StatusAdapterBuilder, failure_action,
};
pub use bounded::{Bounded, call_with_fallback, run_bounded};
pub use config::StatusTiming;
pub use error::{DriverError, DriverErrorKind, Error};
pub use poller::StatusPoller;
pub use resource::{Resource, StatusGuard, publish};
pub use status::{ResourceKind, ResourceStatus, StatusSet};
pub use tasks::{BackgroundTasks, TaskMode};

/// A type alias for Results with resource-status errors
pub type Result<T> = std::result::Result<T, Error>;
