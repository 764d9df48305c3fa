//! Resource kinds, named status flags and the lock-free status bit-set

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// The kind of driver resource a wrapper decorates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
   Connection,
   Statement,
   ResultSet,
}

impl fmt::Display for ResourceKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         ResourceKind::Connection => "CONNECTION",
         ResourceKind::Statement => "STATEMENT",
         ResourceKind::ResultSet => "RESULT_SET",
      };
      f.write_str(name)
   }
}

/// Named boolean flag tracked on a resource.
///
/// Subject statuses (`Closed`, `Valid`, `AutoCommit`, ...) carry externally
/// meaningful state. The `Checking*` and changing (`Closing`, `Changing*`, ...)
/// statuses are transient mutual-exclusion markers owned by a
/// [`ResourceStatusAdapter`](crate::ResourceStatusAdapter) while a probe or
/// transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceStatus {
   Closed,
   Closing,
   CheckingClosed,

   Cancelled,
   Cancelling,
   CheckingCancelled,

   Valid,
   ChangingValid,
   CheckingValid,

   AutoCommit,
   ChangingAutoCommit,
   CheckingAutoCommit,

   ReadOnly,
   ChangingReadOnly,
   CheckingReadOnly,

   Active,
   Reserved,
   Committing,
   RollingBack,
}

impl ResourceStatus {
   pub const ALL: [ResourceStatus; 19] = [
      ResourceStatus::Closed,
      ResourceStatus::Closing,
      ResourceStatus::CheckingClosed,
      ResourceStatus::Cancelled,
      ResourceStatus::Cancelling,
      ResourceStatus::CheckingCancelled,
      ResourceStatus::Valid,
      ResourceStatus::ChangingValid,
      ResourceStatus::CheckingValid,
      ResourceStatus::AutoCommit,
      ResourceStatus::ChangingAutoCommit,
      ResourceStatus::CheckingAutoCommit,
      ResourceStatus::ReadOnly,
      ResourceStatus::ChangingReadOnly,
      ResourceStatus::CheckingReadOnly,
      ResourceStatus::Active,
      ResourceStatus::Reserved,
      ResourceStatus::Committing,
      ResourceStatus::RollingBack,
   ];

   const fn bit(self) -> u32 {
      1 << (self as u8)
   }

   pub fn name(self) -> &'static str {
      match self {
         ResourceStatus::Closed => "CLOSED",
         ResourceStatus::Closing => "CLOSING",
         ResourceStatus::CheckingClosed => "CHECKING_CLOSED",
         ResourceStatus::Cancelled => "CANCELLED",
         ResourceStatus::Cancelling => "CANCELLING",
         ResourceStatus::CheckingCancelled => "CHECKING_CANCELLED",
         ResourceStatus::Valid => "VALID",
         ResourceStatus::ChangingValid => "CHANGING_VALID",
         ResourceStatus::CheckingValid => "CHECKING_VALID",
         ResourceStatus::AutoCommit => "AUTO_COMMIT",
         ResourceStatus::ChangingAutoCommit => "CHANGING_AUTO_COMMIT",
         ResourceStatus::CheckingAutoCommit => "CHECKING_AUTO_COMMIT",
         ResourceStatus::ReadOnly => "READ_ONLY",
         ResourceStatus::ChangingReadOnly => "CHANGING_READ_ONLY",
         ResourceStatus::CheckingReadOnly => "CHECKING_READ_ONLY",
         ResourceStatus::Active => "ACTIVE",
         ResourceStatus::Reserved => "RESERVED",
         ResourceStatus::Committing => "COMMITTING",
         ResourceStatus::RollingBack => "ROLLING_BACK",
      }
   }
}

impl fmt::Display for ResourceStatus {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.name())
   }
}

/// Lock-free set of [`ResourceStatus`] flags.
///
/// This is the only mutable state shared between the adapters of one
/// resource. Every adapter only ever writes its own subject, changing and
/// checking bits, so single-bit atomic updates are sufficient.
#[derive(Default)]
pub struct StatusSet(AtomicU32);

impl StatusSet {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn is(&self, status: ResourceStatus) -> bool {
      self.0.load(Ordering::SeqCst) & status.bit() != 0
   }

   /// Sets or clears a flag, returning `true` if the value actually changed.
   pub fn set(&self, status: ResourceStatus, value: bool) -> bool {
      let bit = status.bit();
      let previous = if value {
         self.0.fetch_or(bit, Ordering::SeqCst)
      } else {
         self.0.fetch_and(!bit, Ordering::SeqCst)
      };
      (previous & bit != 0) != value
   }

   /// Returns every flag currently set, in declaration order.
   pub fn snapshot(&self) -> Vec<ResourceStatus> {
      let bits = self.0.load(Ordering::SeqCst);
      ResourceStatus::ALL
         .into_iter()
         .filter(|status| bits & status.bit() != 0)
         .collect()
   }
}

impl fmt::Debug for StatusSet {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_set().entries(self.snapshot()).finish()
   }
}
