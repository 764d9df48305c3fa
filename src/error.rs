use serde::{Serialize, Serializer};

/// Result type alias for session and transaction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error report for status-display collaborators.
#[derive(Serialize)]
struct ErrorResponse {
   code: String,
   message: String,
}

/// Error types for sessions, database handles and transaction actions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from a managed connection, statement or result set.
   #[error(transparent)]
   Connection(#[from] managed_conn::Error),

   /// The built-in sessions cannot be renamed or removed.
   #[error("session {0} is built in and cannot be renamed or removed")]
   ProtectedSession(String),

   /// Another session of the bundle already uses this name.
   #[error("a session named {0} already exists")]
   DuplicateSessionName(String),

   /// No session with this name or id exists in the bundle.
   #[error("session {0} not found")]
   SessionNotFound(String),

   /// The database handle has been disposed.
   #[error("database handle {0} has been disposed")]
   HandleDisposed(String),

   /// Session state could not be read or written.
   #[error(transparent)]
   Serde(#[from] serde_json::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for status displays.
   pub fn error_code(&self) -> String {
      match self {
         Error::Connection(e) => e.error_code(),
         Error::ProtectedSession(_) => "PROTECTED_SESSION".to_string(),
         Error::DuplicateSessionName(_) => "DUPLICATE_SESSION_NAME".to_string(),
         Error::SessionNotFound(_) => "SESSION_NOT_FOUND".to_string(),
         Error::HandleDisposed(_) => "HANDLE_DISPOSED".to_string(),
         Error::Serde(_) => "SERDE_ERROR".to_string(),
      }
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
      };
      response.serialize(serializer)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_codes() {
      assert_eq!(
         Error::ProtectedSession("Main".into()).error_code(),
         "PROTECTED_SESSION"
      );
      assert_eq!(
         Error::DuplicateSessionName("Reports".into()).error_code(),
         "DUPLICATE_SESSION_NAME"
      );
      assert_eq!(Error::SessionNotFound("x".into()).error_code(), "SESSION_NOT_FOUND");
      assert_eq!(
         Error::Connection(managed_conn::Error::ConnectionClosed).error_code(),
         "CONNECTION_CLOSED"
      );
   }

   #[test]
   fn test_serializes_code_and_message() {
      let json = serde_json::to_value(Error::DuplicateSessionName("Reports".into())).unwrap();
      assert_eq!(json["code"], "DUPLICATE_SESSION_NAME");
      assert_eq!(json["message"], "a session named Reports already exists");
   }
}
