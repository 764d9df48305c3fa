//! Per-connection status settings

use std::time::Duration;

use resource_status::StatusTiming;
use serde::{Deserialize, Serialize};

/// How often the status adapters of a managed connection re-probe the driver
///
/// # Examples
///
/// ```
/// use managed_conn::ConnectionSettings;
///
/// // Use defaults (closed probed on every read, other statuses every 10s)
/// let settings = ConnectionSettings::default();
///
/// // Re-validate at most once a minute
/// let settings = ConnectionSettings {
///     valid_check_interval_ms: 60_000,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
   /// Time budgets of every probe and transition
   pub timing: StatusTiming,

   /// Minimum time between two probes of the closed status
   ///
   /// Default: 0 (probe on every read)
   pub closed_check_interval_ms: u64,

   /// Minimum time between two validity probes
   ///
   /// Default: 10000
   pub valid_check_interval_ms: u64,

   /// Minimum time between two probes of the auto-commit mode
   ///
   /// Default: 10000
   pub auto_commit_check_interval_ms: u64,

   /// Minimum time between two probes of the read-only mode
   ///
   /// Default: 10000
   pub read_only_check_interval_ms: u64,

   /// Time the driver is given to answer a validity ping
   ///
   /// Default: 2
   pub validation_timeout_secs: u64,
}

impl ConnectionSettings {
   pub fn closed_check_interval(&self) -> Duration {
      Duration::from_millis(self.closed_check_interval_ms)
   }

   pub fn valid_check_interval(&self) -> Duration {
      Duration::from_millis(self.valid_check_interval_ms)
   }

   pub fn auto_commit_check_interval(&self) -> Duration {
      Duration::from_millis(self.auto_commit_check_interval_ms)
   }

   pub fn read_only_check_interval(&self) -> Duration {
      Duration::from_millis(self.read_only_check_interval_ms)
   }

   pub fn validation_timeout(&self) -> Duration {
      Duration::from_secs(self.validation_timeout_secs)
   }
}

impl Default for ConnectionSettings {
   fn default() -> Self {
      Self {
         timing: StatusTiming::default(),
         closed_check_interval_ms: 0,
         valid_check_interval_ms: 10_000,
         auto_commit_check_interval_ms: 10_000,
         read_only_check_interval_ms: 10_000,
         validation_timeout_secs: 2,
      }
   }
}
