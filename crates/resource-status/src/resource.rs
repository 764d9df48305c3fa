//! The resource capability contract

use crate::status::{ResourceKind, ResourceStatus, StatusSet};

/// Anything with a typed kind and an observable set of statuses.
///
/// Implemented by the managed connection, statement and result-set wrappers.
/// Implementors typically own one [`StatusSet`] and override
/// [`status_changed`](Resource::status_changed) to react to subject
/// transitions (e.g. to propagate a CLOSED connection upwards).
pub trait Resource: Send + Sync + 'static {
   fn kind(&self) -> ResourceKind;

   fn statuses(&self) -> &StatusSet;

   /// Invoked after a status published by an adapter actually transitioned.
   fn status_changed(&self, status: ResourceStatus) {
      let _ = status;
   }

   fn is(&self, status: ResourceStatus) -> bool {
      self.statuses().is(status)
   }

   /// Sets a status flag, returning `true` if it changed.
   fn set(&self, status: ResourceStatus, value: bool) -> bool {
      self.statuses().set(status, value)
   }
}

/// Sets `status` and fires [`Resource::status_changed`] if it transitioned.
pub fn publish<R: Resource + ?Sized>(resource: &R, status: ResourceStatus, value: bool) -> bool {
   let changed = resource.set(status, value);
   if changed {
      resource.status_changed(status);
   }
   changed
}

/// RAII marker for a transient status.
///
/// Raises the flag on creation and clears it on drop, whatever path the
/// enclosing operation leaves by.
#[must_use = "the status is cleared as soon as the guard is dropped"]
pub struct StatusGuard<'a, R: Resource + ?Sized> {
   resource: &'a R,
   status: ResourceStatus,
}

impl<'a, R: Resource + ?Sized> StatusGuard<'a, R> {
   pub fn raise(resource: &'a R, status: ResourceStatus) -> Self {
      resource.set(status, true);
      Self { resource, status }
   }
}

impl<R: Resource + ?Sized> Drop for StatusGuard<'_, R> {
   fn drop(&mut self) {
      self.resource.set(self.status, false);
   }
}
