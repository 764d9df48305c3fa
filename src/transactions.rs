//! Transaction actions applied across the connections of a database handle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use managed_conn::{ManagedConnection, NativeConnection, PendingChange};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::handle::DatabaseHandle;
use crate::session::{ConnectionId, DatabaseSession, SessionId};

/// An operation the transaction manager can run against one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionAction {
   Commit,
   Rollback,
   RollbackIdle,
   Disconnect,
   DisconnectIdle,
   KeepAlive,
   TurnAutoCommitOn,
   TurnAutoCommitOff,
}

impl TransactionAction {
   /// Whether running the action changes the visible status of the
   /// connection (open/closed, auto-commit mode).
   pub fn is_status_change(self) -> bool {
      matches!(
         self,
         Self::Disconnect | Self::DisconnectIdle | Self::TurnAutoCommitOn | Self::TurnAutoCommitOff
      )
   }

   pub fn name(self) -> &'static str {
      match self {
         Self::Commit => "Commit",
         Self::Rollback => "Rollback",
         Self::RollbackIdle => "Idle Rollback",
         Self::Disconnect => "Disconnect",
         Self::DisconnectIdle => "Idle Disconnect",
         Self::KeepAlive => "Keep Alive",
         Self::TurnAutoCommitOn => "Enable Auto-Commit",
         Self::TurnAutoCommitOff => "Disable Auto-Commit",
      }
   }

   pub async fn apply<C: NativeConnection>(
      self,
      connection: &ManagedConnection<C>,
   ) -> managed_conn::Result<()> {
      match self {
         Self::Commit => connection.commit().await,
         Self::Rollback | Self::RollbackIdle => connection.rollback().await,
         Self::Disconnect | Self::DisconnectIdle => connection.close().await,
         Self::KeepAlive => {
            connection.update_last_access();
            Ok(())
         }
         Self::TurnAutoCommitOn => connection.set_auto_commit(true).await,
         Self::TurnAutoCommitOff => connection.set_auto_commit(false).await,
      }
   }
}

impl fmt::Display for TransactionAction {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.name())
   }
}

/// What to do with uncommitted changes before disconnecting or turning
/// auto-commit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingChangesOption {
   Commit,
   Rollback,
}

/// Notification sent to subscribers of a [`TransactionManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "camelCase")]
pub enum TransactionEvent {
   #[serde(rename_all = "camelCase")]
   BeforeAction {
      connection_id: ConnectionId,
      session: Option<SessionId>,
      action: TransactionAction,
   },
   #[serde(rename_all = "camelCase")]
   AfterAction {
      connection_id: ConnectionId,
      session: Option<SessionId>,
      action: TransactionAction,
      succeeded: bool,
   },
   #[serde(rename_all = "camelCase")]
   StatusChanged { connection_id: ConnectionId },
}

/// Result of running one action against one connection
#[derive(Debug)]
pub struct ActionOutcome {
   pub connection: String,
   pub session: Option<SessionId>,
   pub action: TransactionAction,
   pub error: Option<managed_conn::Error>,
}

impl ActionOutcome {
   pub fn succeeded(&self) -> bool {
      self.error.is_none()
   }
}

/// A connection holding uncommitted changes
#[derive(Debug)]
pub struct PendingTransaction<C: NativeConnection> {
   pub session: Option<Arc<DatabaseSession>>,
   pub connection: Arc<ManagedConnection<C>>,
   pub changes: Vec<PendingChange>,
}

/// Runs transaction actions against the connections of database handles.
///
/// Every action runs to completion on every targeted connection; a failure
/// is reported in its [`ActionOutcome`] and does not stop the remaining
/// actions or connections.
#[derive(Debug, Clone)]
pub struct TransactionManager {
   events: broadcast::Sender<TransactionEvent>,
}

impl Default for TransactionManager {
   fn default() -> Self {
      Self::new(64)
   }
}

impl TransactionManager {
   /// Creates a manager whose event channel buffers `channel_capacity` events.
   pub fn new(channel_capacity: usize) -> Self {
      let (events, _) = broadcast::channel(channel_capacity);
      Self { events }
   }

   pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
      self.events.subscribe()
   }

   /// Runs `actions` in order against `target`, or against every
   /// transactional connection of `handle` when no target is given.
   pub async fn execute<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      target: Option<&Arc<ManagedConnection<C>>>,
      actions: &[TransactionAction],
   ) -> Vec<ActionOutcome> {
      let targets = match target {
         Some(connection) => vec![Arc::clone(connection)],
         None => handle.transactional_connections(),
      };

      let mut outcomes = Vec::with_capacity(targets.len() * actions.len());
      for connection in targets {
         self.execute_actions(handle, &connection, actions, &mut outcomes).await;
      }
      outcomes
   }

   pub async fn commit<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      target: Option<&Arc<ManagedConnection<C>>>,
   ) -> Vec<ActionOutcome> {
      self.execute(handle, target, &[TransactionAction::Commit]).await
   }

   pub async fn rollback<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      target: Option<&Arc<ManagedConnection<C>>>,
   ) -> Vec<ActionOutcome> {
      self.execute(handle, target, &[TransactionAction::Rollback]).await
   }

   /// Commits every handle that holds uncommitted changes.
   pub async fn commit_all<C: NativeConnection>(
      &self,
      handles: &[Arc<DatabaseHandle<C>>],
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for handle in handles.iter().filter(|h| h.has_uncommitted_changes()) {
         outcomes.extend(self.commit(handle, None).await);
      }
      outcomes
   }

   /// Rolls back every handle that holds uncommitted changes.
   pub async fn rollback_all<C: NativeConnection>(
      &self,
      handles: &[Arc<DatabaseHandle<C>>],
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for handle in handles.iter().filter(|h| h.has_uncommitted_changes()) {
         outcomes.extend(self.rollback(handle, None).await);
      }
      outcomes
   }

   /// Closes every connection of `handle`, pool included.
   ///
   /// Connections with uncommitted changes are committed first when
   /// `on_pending` says so; otherwise closing discards the changes.
   pub async fn disconnect<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      on_pending: PendingChangesOption,
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for connection in handle.connections() {
         let actions: &[TransactionAction] =
            match (connection.has_data_changes(), on_pending) {
               (true, PendingChangesOption::Commit) => {
                  &[TransactionAction::Commit, TransactionAction::Disconnect]
               }
               _ => &[TransactionAction::Disconnect],
            };
         self.execute_actions(handle, &connection, actions, &mut outcomes).await;
      }
      outcomes
   }

   /// Flips the auto-commit mode of `handle` and of its transactional
   /// connections.
   ///
   /// When auto-commit is being turned on, connections with uncommitted
   /// changes are committed or rolled back first as `on_pending` says.
   pub async fn toggle_auto_commit<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      on_pending: PendingChangesOption,
   ) -> Vec<ActionOutcome> {
      let auto_commit = handle.is_auto_commit();
      let toggle = if auto_commit {
         TransactionAction::TurnAutoCommitOff
      } else {
         TransactionAction::TurnAutoCommitOn
      };
      handle.set_auto_commit(!auto_commit);

      let mut outcomes = Vec::new();
      for connection in handle.transactional_connections() {
         let mut actions = Vec::with_capacity(2);
         if !auto_commit && connection.has_data_changes() {
            actions.push(match on_pending {
               PendingChangesOption::Commit => TransactionAction::Commit,
               PendingChangesOption::Rollback => TransactionAction::Rollback,
            });
         }
         actions.push(toggle);
         self.execute_actions(handle, &connection, &actions, &mut outcomes).await;
      }
      outcomes
   }

   /// Rolls back transactional connections whose uncommitted changes have
   /// been left untouched for at least `idle_after`.
   pub async fn rollback_idle<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      idle_after: Duration,
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for connection in handle.transactional_connections() {
         if connection.has_data_changes()
            && !connection.is_active()
            && connection.idle_for() >= idle_after
         {
            let actions = [TransactionAction::RollbackIdle];
            self.execute_actions(handle, &connection, &actions, &mut outcomes).await;
         }
      }
      outcomes
   }

   /// Closes open connections without uncommitted changes that have been
   /// idle for at least `idle_after`.
   ///
   /// Active and reserved connections are left alone.
   pub async fn disconnect_idle<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      idle_after: Duration,
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for connection in handle.connections() {
         if connection.is_active()
            || connection.is_reserved()
            || connection.has_data_changes()
            || connection.idle_for() < idle_after
            || connection.is_closed().await
         {
            continue;
         }
         let actions = [TransactionAction::DisconnectIdle];
         self.execute_actions(handle, &connection, &actions, &mut outcomes).await;
      }
      outcomes
   }

   /// Refreshes the last access time of every connection of `handle`.
   pub async fn keep_alive<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
   ) -> Vec<ActionOutcome> {
      let mut outcomes = Vec::new();
      for connection in handle.connections() {
         let actions = [TransactionAction::KeepAlive];
         self.execute_actions(handle, &connection, &actions, &mut outcomes).await;
      }
      outcomes
   }

   /// Connections of `handle` holding uncommitted changes, with the changes.
   pub fn pending_transactions<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
   ) -> Vec<PendingTransaction<C>> {
      handle
         .connections()
         .into_iter()
         .filter(|connection| connection.has_data_changes())
         .map(|connection| PendingTransaction {
            session: handle.session_of(&connection),
            changes: connection.pending_changes().snapshot(),
            connection,
         })
         .collect()
   }

   pub fn has_pending_transactions<C: NativeConnection>(&self, handle: &DatabaseHandle<C>) -> bool {
      handle.has_uncommitted_changes()
   }

   async fn execute_actions<C: NativeConnection>(
      &self,
      handle: &DatabaseHandle<C>,
      connection: &Arc<ManagedConnection<C>>,
      actions: &[TransactionAction],
      outcomes: &mut Vec<ActionOutcome>,
   ) {
      let session = handle.session_of(connection).map(|s| s.id().clone());

      for &action in actions {
         let _ = self.events.send(TransactionEvent::BeforeAction {
            connection_id: handle.id().clone(),
            session: session.clone(),
            action,
         });

         let error = match action.apply(connection).await {
            Ok(()) => {
               debug!(connection = %connection.label(), %action, "Transaction action succeeded");
               None
            }
            Err(e) => {
               warn!(connection = %connection.label(), %action, error = %e, "Transaction action failed");
               Some(e)
            }
         };

         let _ = self.events.send(TransactionEvent::AfterAction {
            connection_id: handle.id().clone(),
            session: session.clone(),
            action,
            succeeded: error.is_none(),
         });
         if action.is_status_change() {
            let _ = self.events.send(TransactionEvent::StatusChanged {
               connection_id: handle.id().clone(),
            });
         }

         outcomes.push(ActionOutcome {
            connection: connection.label().to_string(),
            session: session.clone(),
            action,
            error,
         });
      }
   }
}
