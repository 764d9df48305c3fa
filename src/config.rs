//! Persisted session layout
//!
//! Only custom sessions are recorded; the built-in "Main" and "Pool"
//! sessions exist on every bundle.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::SessionBundle;
use crate::error::{Error, Result};
use crate::session::{ConnectionId, SessionId};

/// Saved sessions of every connection
///
/// # Examples
///
/// ```
/// use conn_sessions::{ConnectionId, SessionBundle, SessionsState};
///
/// let bundle = SessionBundle::new(ConnectionId::new("db-1"));
/// bundle.create_session("Reports");
///
/// let json = SessionsState::capture([&bundle]).to_json().unwrap();
///
/// let restored = SessionBundle::new(ConnectionId::new("db-1"));
/// SessionsState::from_json(&json).unwrap().restore(&restored).unwrap();
/// assert_eq!(restored.session_names(), ["Main", "Pool", "Reports"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionsState {
   pub connections: Vec<ConnectionSessions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSessions {
   pub connection_id: ConnectionId,
   #[serde(default)]
   pub sessions: Vec<SessionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
   pub id: SessionId,
   pub name: String,
}

impl SessionsState {
   /// Records the custom sessions of `bundles`. Bundles without custom
   /// sessions are left out.
   pub fn capture<'a>(bundles: impl IntoIterator<Item = &'a SessionBundle>) -> Self {
      let connections = bundles
         .into_iter()
         .filter_map(|bundle| {
            let sessions: Vec<_> = bundle
               .sessions()
               .iter()
               .filter(|s| s.is_custom())
               .map(|s| SessionRecord {
                  id: s.id().clone(),
                  name: s.name(),
               })
               .collect();
            (!sessions.is_empty()).then(|| ConnectionSessions {
               connection_id: bundle.connection_id().clone(),
               sessions,
            })
         })
         .collect();

      Self { connections }
   }

   /// Recreates the recorded sessions of the bundle's connection.
   ///
   /// Sessions whose id or name already exists are skipped, as are records
   /// naming a built-in session. Returns the number of sessions added.
   pub fn restore(&self, bundle: &SessionBundle) -> Result<usize> {
      let Some(entry) = self
         .connections
         .iter()
         .find(|c| &c.connection_id == bundle.connection_id())
      else {
         return Ok(0);
      };

      let mut restored = 0;
      for record in &entry.sessions {
         match bundle.add_session(record.id.clone(), &record.name) {
            Ok(_) => restored += 1,
            Err(Error::DuplicateSessionName(name)) => {
               debug!(connection = %entry.connection_id, name = %name, "Session already present, skipping");
            }
            Err(Error::ProtectedSession(id)) => {
               warn!(connection = %entry.connection_id, id = %id, "Ignoring saved built-in session");
            }
            Err(e) => return Err(e),
         }
      }
      Ok(restored)
   }

   pub fn to_json(&self) -> Result<String> {
      Ok(serde_json::to_string_pretty(self)?)
   }

   pub fn from_json(json: &str) -> Result<Self> {
      Ok(serde_json::from_str(json)?)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_capture_skips_builtin_sessions() {
      let empty = SessionBundle::new(ConnectionId::new("db-0"));
      let bundle = SessionBundle::new(ConnectionId::new("db-1"));
      let reports = bundle.create_session("Reports");

      let state = SessionsState::capture([&empty, &bundle]);

      assert_eq!(state.connections.len(), 1);
      assert_eq!(state.connections[0].connection_id, ConnectionId::new("db-1"));
      assert_eq!(
         state.connections[0].sessions,
         [SessionRecord {
            id: reports.id().clone(),
            name: "Reports".to_string(),
         }]
      );
   }

   #[test]
   fn test_restore_keeps_ids_and_skips_existing() {
      let source = SessionBundle::new(ConnectionId::new("db-1"));
      let audit = source.create_session("Audit");
      source.create_session("Reports");
      let state = SessionsState::capture([&source]);

      let target = SessionBundle::new(ConnectionId::new("db-1"));
      target.create_session("Reports");

      assert_eq!(state.restore(&target).unwrap(), 1);
      assert_eq!(target.session_names(), ["Main", "Pool", "Audit", "Reports"]);
      assert!(target.session_by_id(audit.id()).is_some());

      // a second restore adds nothing
      assert_eq!(state.restore(&target).unwrap(), 0);
   }

   #[test]
   fn test_restore_other_connection_is_noop() {
      let source = SessionBundle::new(ConnectionId::new("db-1"));
      source.create_session("Reports");
      let state = SessionsState::capture([&source]);

      let other = SessionBundle::new(ConnectionId::new("db-2"));
      assert_eq!(state.restore(&other).unwrap(), 0);
      assert_eq!(other.len(), 2);
   }

   #[test]
   fn test_json_layout() {
      let json = r#"{
         "connections": [
            { "connectionId": "db-1", "sessions": [{ "id": "s-1", "name": "Reports" }] }
         ]
      }"#;
      let state = SessionsState::from_json(json).unwrap();
      assert_eq!(state.connections[0].sessions[0].id, SessionId::new("s-1"));

      let empty = SessionsState::from_json("{}").unwrap();
      assert!(empty.connections.is_empty());

      assert!(matches!(
         SessionsState::from_json("not json"),
         Err(Error::Serde(_))
      ));
   }

   #[test]
   fn test_restore_ignores_builtin_records() {
      let state = SessionsState {
         connections: vec![ConnectionSessions {
            connection_id: ConnectionId::new("db-1"),
            sessions: vec![SessionRecord {
               id: SessionId::MAIN,
               name: "Primary".to_string(),
            }],
         }],
      };
      let bundle = SessionBundle::new(ConnectionId::new("db-1"));
      assert_eq!(state.restore(&bundle).unwrap(), 0);
      assert_eq!(bundle.session_names(), ["Main", "Pool"]);
   }
}
