//! Error types for resource-status

use std::time::Duration;

use thiserror::Error;

use crate::status::{ResourceKind, ResourceStatus};

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
   /// The physical connection is gone (network drop, server restart, ...).
   /// Callers treat the connection as closed rather than retrying.
   ConnectionLost,
   /// The operation was cancelled by the driver or by the caller.
   Cancelled,
   /// Any other failure reported by the driver.
   Other,
}

/// A failure reported by the underlying database driver.
///
/// Cloneable so a wrapper can remember a failure for diagnostics while still
/// returning it to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
   pub message: String,
   /// Vendor or SQLSTATE code, when the driver provides one
   pub code: Option<String>,
   pub kind: DriverErrorKind,
}

impl DriverError {
   pub fn new(message: impl Into<String>) -> Self {
      Self {
         message: message.into(),
         code: None,
         kind: DriverErrorKind::Other,
      }
   }

   pub fn connection_lost(message: impl Into<String>) -> Self {
      Self {
         kind: DriverErrorKind::ConnectionLost,
         ..Self::new(message)
      }
   }

   pub fn cancelled(message: impl Into<String>) -> Self {
      Self {
         kind: DriverErrorKind::Cancelled,
         ..Self::new(message)
      }
   }

   pub fn with_code(mut self, code: impl Into<String>) -> Self {
      self.code = Some(code.into());
      self
   }

   pub fn is_connection_lost(&self) -> bool {
      self.kind == DriverErrorKind::ConnectionLost
   }
}

/// Errors that may occur while checking or changing a resource status
#[derive(Debug, Error)]
pub enum Error {
   /// The driver call behind a probe or transition failed
   #[error(transparent)]
   Driver(#[from] DriverError),

   /// A status transition did not complete within its time budget
   #[error("changing {kind} status {status} to {value} timed out after {timeout:?}")]
   Timeout {
      kind: ResourceKind,
      status: ResourceStatus,
      value: bool,
      timeout: Duration,
   },

   /// The resource was dropped by all of its owners
   #[error("resource has already been released")]
   ResourceReleased,

   /// Background work was aborted before it completed (e.g. on shutdown)
   #[error("background work was aborted")]
   Aborted,

   /// Background work panicked
   #[error("background work panicked: {0}")]
   Panicked(String),
}

impl Error {
   /// Returns the driver failure behind this error, if there is one.
   pub fn as_driver_error(&self) -> Option<&DriverError> {
      match self {
         Error::Driver(e) => Some(e),
         _ => None,
      }
   }
}
