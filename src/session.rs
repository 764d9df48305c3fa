//! Logical sessions multiplexed over one connection identity

use std::borrow::Cow;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
   pub fn new(id: impl Into<String>) -> Self {
      Self(id.into())
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }
}

impl fmt::Display for ConnectionId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

/// Identifier of a session within its bundle.
///
/// The built-in sessions use the fixed ids [`SessionId::MAIN`] and
/// [`SessionId::POOL`]; custom sessions get a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Cow<'static, str>);

impl SessionId {
   pub const MAIN: SessionId = SessionId(Cow::Borrowed("MAIN"));
   pub const POOL: SessionId = SessionId(Cow::Borrowed("POOL"));

   /// Generates a new id for a custom session.
   pub fn create() -> Self {
      Self(Cow::Owned(Uuid::new_v4().to_string()))
   }

   pub fn new(id: impl Into<String>) -> Self {
      Self(Cow::Owned(id.into()))
   }

   pub fn as_str(&self) -> &str {
      &self.0
   }

   pub fn is_main(&self) -> bool {
      *self == Self::MAIN
   }

   pub fn is_pool(&self) -> bool {
      *self == Self::POOL
   }

   pub fn is_custom(&self) -> bool {
      !self.is_main() && !self.is_pool()
   }
}

impl fmt::Display for SessionId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.0)
   }
}

/// A named logical execution context on one connection identity.
#[derive(Debug)]
pub struct DatabaseSession {
   id: SessionId,
   connection_id: ConnectionId,
   name: RwLock<String>,
   disposed: AtomicBool,
}

impl DatabaseSession {
   pub fn new(id: SessionId, name: impl Into<String>, connection_id: ConnectionId) -> Self {
      Self {
         id,
         connection_id,
         name: RwLock::new(name.into()),
         disposed: AtomicBool::new(false),
      }
   }

   pub fn id(&self) -> &SessionId {
      &self.id
   }

   pub fn connection_id(&self) -> &ConnectionId {
      &self.connection_id
   }

   pub fn name(&self) -> String {
      self.name.read().clone()
   }

   pub fn has_name(&self, name: &str) -> bool {
      *self.name.read() == name
   }

   pub fn is_main(&self) -> bool {
      self.id.is_main()
   }

   pub fn is_pool(&self) -> bool {
      self.id.is_pool()
   }

   pub fn is_custom(&self) -> bool {
      self.id.is_custom()
   }

   pub fn is_disposed(&self) -> bool {
      self.disposed.load(Ordering::Acquire)
   }

   /// Display order: Main first, Pool second, then by name (case-sensitive).
   pub fn display_order(&self, other: &DatabaseSession) -> CmpOrdering {
      if std::ptr::eq(self, other) {
         return CmpOrdering::Equal;
      }
      match (self.rank(), other.rank()) {
         (2, 2) => self.name.read().as_str().cmp(other.name.read().as_str()),
         (a, b) => a.cmp(&b),
      }
   }

   pub(crate) fn rename(&self, name: impl Into<String>) {
      *self.name.write() = name.into();
   }

   pub(crate) fn dispose(&self) {
      self.disposed.store(true, Ordering::Release);
   }

   fn rank(&self) -> u8 {
      if self.is_main() {
         0
      } else if self.is_pool() {
         1
      } else {
         2
      }
   }
}

impl fmt::Display for DatabaseSession {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.name.read())
   }
}
