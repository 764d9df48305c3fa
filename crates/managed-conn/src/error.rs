use resource_status::DriverError;
use thiserror::Error;

/// Errors that may occur while working with managed resources
#[derive(Debug, Error)]
pub enum Error {
   /// A status check or transition failed, or the driver call behind it did
   #[error(transparent)]
   Status(#[from] resource_status::Error),

   /// Error from SQLx while opening a connection
   #[cfg(feature = "sqlite")]
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// The owning connection was dropped by all of its owners
   #[error("connection has already been released")]
   ConnectionReleased,

   /// Operation on a statement that has been closed
   #[error("statement is closed")]
   StatementClosed,

   /// Operation on a result set that has been closed
   #[error("result set is closed")]
   ResultSetClosed,

   /// Operation on a connection that has been closed
   #[error("connection is closed")]
   ConnectionClosed,

   /// A query was expected to produce rows but did not
   #[error("statement did not produce a result set")]
   NoResultSet,

   /// SQLite type that cannot be mapped to JSON
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),
}

impl From<DriverError> for Error {
   fn from(e: DriverError) -> Self {
      Error::Status(resource_status::Error::Driver(e))
   }
}

impl Error {
   /// Returns the driver failure behind this error, if there is one.
   pub fn as_driver_error(&self) -> Option<&DriverError> {
      match self {
         Error::Status(e) => e.as_driver_error(),
         _ => None,
      }
   }

   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      if let Some(code) = self.as_driver_error().and_then(|e| e.code.as_deref()) {
         return format!("DRIVER_{}", code);
      }

      match self {
         Error::Status(resource_status::Error::Driver(_)) => "DRIVER_ERROR".to_string(),
         Error::Status(resource_status::Error::Timeout { .. }) => "STATUS_TIMEOUT".to_string(),
         Error::Status(_) => "STATUS_ERROR".to_string(),
         #[cfg(feature = "sqlite")]
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionReleased => "CONNECTION_RELEASED".to_string(),
         Error::StatementClosed => "STATEMENT_CLOSED".to_string(),
         Error::ResultSetClosed => "RESULT_SET_CLOSED".to_string(),
         Error::ConnectionClosed => "CONNECTION_CLOSED".to_string(),
         Error::NoResultSet => "NO_RESULT_SET".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_driver_error_code_passes_through() {
      let err: Error = DriverError::new("constraint failed").with_code("2067").into();
      assert_eq!(err.error_code(), "DRIVER_2067");
      assert_eq!(err.to_string(), "constraint failed");
   }

   #[test]
   fn test_driver_error_without_code() {
      let err: Error = DriverError::connection_lost("gone").into();
      assert_eq!(err.error_code(), "DRIVER_ERROR");
      assert!(err.as_driver_error().is_some_and(DriverError::is_connection_lost));
   }

   #[test]
   fn test_error_code_closed_resources() {
      assert_eq!(Error::StatementClosed.error_code(), "STATEMENT_CLOSED");
      assert_eq!(Error::ConnectionClosed.error_code(), "CONNECTION_CLOSED");
      assert_eq!(Error::ResultSetClosed.error_code(), "RESULT_SET_CLOSED");
      assert!(Error::NoResultSet.as_driver_error().is_none());
   }

   #[test]
   fn test_error_code_unsupported_datatype() {
      let err = Error::UnsupportedDatatype("GEOMETRY".into());
      assert_eq!(err.error_code(), "UNSUPPORTED_DATATYPE");
      assert_eq!(err.to_string(), "unsupported datatype: GEOMETRY");
   }
}
