//! The logical database handle: one connection identity, its sessions and
//! the managed connection opened for each session

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use managed_conn::{ConnectionSettings, ManagedConnection, NativeConnection};
use parking_lot::RwLock;
use resource_status::BackgroundTasks;
use tracing::{debug, warn};

use crate::bundle::SessionBundle;
use crate::error::{Error, Result};
use crate::session::{ConnectionId, DatabaseSession, SessionId};

/// A configured database together with its sessions and open connections.
///
/// Every connection attached to the handle shares the handle's settings and
/// background task registry, so disposing the handle shuts all of their
/// in-flight status work down at once.
pub struct DatabaseHandle<C: NativeConnection> {
   id: ConnectionId,
   name: String,
   sessions: SessionBundle,
   connections: RwLock<IndexMap<SessionId, Arc<ManagedConnection<C>>>>,
   settings: ConnectionSettings,
   tasks: BackgroundTasks,
   /// Auto-commit mode applied to newly attached connections
   auto_commit: AtomicBool,
}

impl<C: NativeConnection> DatabaseHandle<C> {
   pub fn new(id: ConnectionId, name: impl Into<String>, settings: ConnectionSettings) -> Self {
      Self {
         sessions: SessionBundle::new(id.clone()),
         id,
         name: name.into(),
         connections: RwLock::new(IndexMap::new()),
         settings,
         tasks: BackgroundTasks::new(),
         auto_commit: AtomicBool::new(true),
      }
   }

   pub fn id(&self) -> &ConnectionId {
      &self.id
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn sessions(&self) -> &SessionBundle {
      &self.sessions
   }

   pub fn settings(&self) -> &ConnectionSettings {
      &self.settings
   }

   pub fn tasks(&self) -> &BackgroundTasks {
      &self.tasks
   }

   pub fn is_disposed(&self) -> bool {
      self.sessions.is_disposed()
   }

   /// Auto-commit mode new connections are opened with.
   pub fn is_auto_commit(&self) -> bool {
      self.auto_commit.load(Ordering::Acquire)
   }

   pub(crate) fn set_auto_commit(&self, value: bool) {
      self.auto_commit.store(value, Ordering::Release);
   }

   /// Wraps `native` as the connection of `session`.
   ///
   /// A connection previously attached to the same session is closed.
   pub async fn attach(
      &self,
      session: &SessionId,
      native: C,
   ) -> Result<Arc<ManagedConnection<C>>> {
      if self.is_disposed() {
         return Err(Error::HandleDisposed(self.name.clone()));
      }
      let session = self
         .sessions
         .session_by_id(session)
         .ok_or_else(|| Error::SessionNotFound(session.to_string()))?;

      let label = format!("{}/{}", self.name, session.name());
      let connection =
         ManagedConnection::new(label, native, self.settings, self.tasks.clone());
      if !self.is_auto_commit() {
         connection.set_auto_commit(false).await?;
      }

      let replaced = self
         .connections
         .write()
         .insert(session.id().clone(), Arc::clone(&connection));
      debug!(connection = %self.id, session = %session.id(), "Attached connection");

      if let Some(replaced) = replaced
         && let Err(e) = replaced.close().await
      {
         warn!(connection = %self.id, session = %session.id(), error = %e, "Failed to close replaced connection");
      }
      Ok(connection)
   }

   /// Forgets the connection of `session` without closing it.
   pub fn detach(&self, session: &SessionId) -> Option<Arc<ManagedConnection<C>>> {
      self.connections.write().shift_remove(session)
   }

   pub fn connection(&self, session: &SessionId) -> Option<Arc<ManagedConnection<C>>> {
      self.connections.read().get(session).cloned()
   }

   /// Every attached connection, including the pool's.
   pub fn connections(&self) -> Vec<Arc<ManagedConnection<C>>> {
      self.connections.read().values().cloned().collect()
   }

   /// Connections that carry user transactions: the main session's and
   /// those of custom sessions.
   pub fn transactional_connections(&self) -> Vec<Arc<ManagedConnection<C>>> {
      self
         .connections
         .read()
         .iter()
         .filter(|(session, _)| !session.is_pool())
         .map(|(_, connection)| Arc::clone(connection))
         .collect()
   }

   /// The session `connection` is attached to.
   pub fn session_of(&self, connection: &Arc<ManagedConnection<C>>) -> Option<Arc<DatabaseSession>> {
      let connections = self.connections.read();
      let (session, _) = connections
         .iter()
         .find(|(_, attached)| Arc::ptr_eq(attached, connection))?;
      self.sessions.session_by_id(session)
   }

   /// Removes a custom session and closes its connection.
   pub async fn remove_session(&self, name: &str) -> Result<()> {
      let Some(session) = self.sessions.remove_session(name)? else {
         return Ok(());
      };
      if let Some(connection) = self.detach(session.id()) {
         connection.close().await?;
      }
      Ok(())
   }

   /// Whether any attached connection holds uncommitted changes.
   pub fn has_uncommitted_changes(&self) -> bool {
      self
         .connections
         .read()
         .values()
         .any(|connection| connection.has_data_changes())
   }

   /// Closes every connection, disposes every session and shuts down the
   /// background work of the handle.
   ///
   /// Returns `true` if everything finished within `grace`.
   pub async fn dispose(&self, grace: Duration) -> bool {
      let connections: Vec<_> = {
         let mut guard = self.connections.write();
         guard.drain(..).map(|(_, connection)| connection).collect()
      };
      self.sessions.dispose();

      debug!(connection = %self.id, "Closing {} connection(s)", connections.len());
      let mut set = tokio::task::JoinSet::new();
      for connection in connections {
         set.spawn(async move { connection.close().await });
      }

      let closed = tokio::time::timeout(grace, async {
         while let Some(result) = set.join_next().await {
            match result {
               Ok(Err(e)) => warn!("Error closing connection: {}", e),
               Err(e) => warn!("Connection close task panicked: {:?}", e),
               Ok(Ok(())) => {}
            }
         }
      })
      .await
      .is_ok();
      if !closed {
         warn!(connection = %self.id, "Closing connections timed out after {:?}", grace);
      }

      let drained = self.tasks.shutdown(grace).await;
      closed && drained
   }
}

impl<C: NativeConnection> std::fmt::Debug for DatabaseHandle<C> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("DatabaseHandle")
         .field("id", &self.id)
         .field("name", &self.name)
         .field("sessions", &self.sessions.session_names())
         .field("connections", &self.connections.read().len())
         .finish()
   }
}
