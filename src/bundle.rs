//! The per-connection collection of named sessions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::session::{ConnectionId, DatabaseSession, SessionId};

/// Sessions of one connection identity.
///
/// Always holds the built-in "Main" and "Pool" sessions. Iteration works on
/// snapshots, so it is never blocked by (and never observes half of) a
/// concurrent create, rename or remove.
#[derive(Debug)]
pub struct SessionBundle {
   connection_id: ConnectionId,
   main: Arc<DatabaseSession>,
   pool: Arc<DatabaseSession>,
   sessions: RwLock<Arc<Vec<Arc<DatabaseSession>>>>,
   /// Serializes get-or-create so racing callers share one session
   creation: Mutex<()>,
   disposed: AtomicBool,
}

impl SessionBundle {
   pub fn new(connection_id: ConnectionId) -> Self {
      let main = Arc::new(DatabaseSession::new(
         SessionId::MAIN,
         "Main",
         connection_id.clone(),
      ));
      let pool = Arc::new(DatabaseSession::new(
         SessionId::POOL,
         "Pool",
         connection_id.clone(),
      ));

      Self {
         sessions: RwLock::new(Arc::new(vec![Arc::clone(&main), Arc::clone(&pool)])),
         connection_id,
         main,
         pool,
         creation: Mutex::new(()),
         disposed: AtomicBool::new(false),
      }
   }

   pub fn connection_id(&self) -> &ConnectionId {
      &self.connection_id
   }

   pub fn main(&self) -> &Arc<DatabaseSession> {
      &self.main
   }

   pub fn pool(&self) -> &Arc<DatabaseSession> {
      &self.pool
   }

   /// All sessions in display order.
   pub fn sessions(&self) -> Vec<Arc<DatabaseSession>> {
      self.snapshot().to_vec()
   }

   pub fn session_names(&self) -> Vec<String> {
      self.snapshot().iter().map(|s| s.name()).collect()
   }

   pub fn len(&self) -> usize {
      self.snapshot().len()
   }

   pub fn is_empty(&self) -> bool {
      self.snapshot().is_empty()
   }

   pub fn session(&self, name: &str) -> Option<Arc<DatabaseSession>> {
      self.snapshot().iter().find(|s| s.has_name(name)).cloned()
   }

   pub fn session_by_id(&self, id: &SessionId) -> Option<Arc<DatabaseSession>> {
      self.snapshot().iter().find(|s| s.id() == id).cloned()
   }

   /// Looks a session up by name, creating it if missing and `create` is set.
   ///
   /// Racing callers asking for the same missing name all receive the same
   /// new session.
   pub fn get_session(&self, name: &str, create: bool) -> Option<Arc<DatabaseSession>> {
      if let Some(session) = self.session(name) {
         return Some(session);
      }
      if !create {
         return None;
      }

      let _creation = self.creation.lock();
      if let Some(session) = self.session(name) {
         return Some(session);
      }
      Some(self.create_session(name))
   }

   /// Creates a new custom session.
   ///
   /// Does not check for an existing session with the same name; use
   /// [`get_session`](Self::get_session) for that.
   pub fn create_session(&self, name: &str) -> Arc<DatabaseSession> {
      let session = Arc::new(DatabaseSession::new(
         SessionId::create(),
         name,
         self.connection_id.clone(),
      ));
      self.insert(Arc::clone(&session));
      debug!(connection = %self.connection_id, session = %session.id(), name, "Created session");
      session
   }

   /// Adds a session with a known id, e.g. when restoring saved state.
   pub fn add_session(&self, id: SessionId, name: &str) -> Result<Arc<DatabaseSession>> {
      let _creation = self.creation.lock();
      if !id.is_custom() {
         return Err(Error::ProtectedSession(id.to_string()));
      }
      if self.session(name).is_some() || self.session_by_id(&id).is_some() {
         return Err(Error::DuplicateSessionName(name.to_string()));
      }

      let session = Arc::new(DatabaseSession::new(id, name, self.connection_id.clone()));
      self.insert(Arc::clone(&session));
      trace!(connection = %self.connection_id, session = %session.id(), name, "Restored session");
      Ok(session)
   }

   /// Renames a session. Does nothing if `old_name` does not exist.
   pub fn rename_session(&self, old_name: &str, new_name: &str) -> Result<()> {
      let _creation = self.creation.lock();
      let Some(session) = self.session(old_name) else {
         return Ok(());
      };
      if !session.is_custom() {
         return Err(Error::ProtectedSession(old_name.to_string()));
      }
      if old_name != new_name && self.session(new_name).is_some() {
         return Err(Error::DuplicateSessionName(new_name.to_string()));
      }

      session.rename(new_name);
      self.modify(|sessions| sort(sessions));
      debug!(connection = %self.connection_id, session = %session.id(), old_name, new_name, "Renamed session");
      Ok(())
   }

   /// Removes and disposes a session. Does nothing if it does not exist.
   pub fn remove_session(&self, name: &str) -> Result<Option<Arc<DatabaseSession>>> {
      match self.session(name) {
         Some(session) => self.remove(&session).map(Some),
         None => Ok(None),
      }
   }

   /// Removes and disposes a session by id. Does nothing if it does not exist.
   pub fn delete_session(&self, id: &SessionId) -> Result<Option<Arc<DatabaseSession>>> {
      match self.session_by_id(id) {
         Some(session) => self.remove(&session).map(Some),
         None => Ok(None),
      }
   }

   /// Disposes every session. The bundle keeps its contents for inspection.
   pub fn dispose(&self) {
      if self.disposed.swap(true, Ordering::AcqRel) {
         return;
      }
      for session in self.snapshot().iter() {
         session.dispose();
      }
      debug!(connection = %self.connection_id, "Disposed session bundle");
   }

   pub fn is_disposed(&self) -> bool {
      self.disposed.load(Ordering::Acquire)
   }

   fn snapshot(&self) -> Arc<Vec<Arc<DatabaseSession>>> {
      Arc::clone(&self.sessions.read())
   }

   fn insert(&self, session: Arc<DatabaseSession>) {
      self.modify(|sessions| {
         sessions.push(session);
         sort(sessions);
      });
   }

   fn remove(&self, session: &Arc<DatabaseSession>) -> Result<Arc<DatabaseSession>> {
      if !session.is_custom() {
         return Err(Error::ProtectedSession(session.name()));
      }

      self.modify(|sessions| sessions.retain(|s| !Arc::ptr_eq(s, session)));
      session.dispose();
      debug!(connection = %self.connection_id, session = %session.id(), "Removed session");
      Ok(Arc::clone(session))
   }

   fn modify(&self, f: impl FnOnce(&mut Vec<Arc<DatabaseSession>>)) {
      let mut sessions = self.sessions.write();
      let mut updated = Vec::clone(&sessions);
      f(&mut updated);
      *sessions = Arc::new(updated);
   }
}

fn sort(sessions: &mut [Arc<DatabaseSession>]) {
   sessions.sort_by(|a, b| a.display_order(b));
}
