//! Timing configuration for status probes and transitions

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time budgets applied by every [`ResourceStatusAdapter`](crate::ResourceStatusAdapter)
///
/// # Examples
///
/// ```
/// use resource_status::StatusTiming;
///
/// // Use defaults (5s probes, 10s transitions, 5s retry after a failed probe)
/// let timing = StatusTiming::default();
///
/// // Tighten the probe budget only
/// let timing = StatusTiming {
///     check_timeout_ms: 500,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTiming {
   /// Maximum time a status probe may take before the last known value is used
   ///
   /// Default: 5000
   pub check_timeout_ms: u64,

   /// Maximum time a status transition may take before it is reported as failed
   ///
   /// Default: 10000
   pub change_timeout_ms: u64,

   /// Delay before a failed probe of a debounced status is retried
   ///
   /// Never longer than the adapter's own check interval.
   ///
   /// Default: 5000
   pub retry_delay_ms: u64,
}

impl StatusTiming {
   pub fn check_timeout(&self) -> Duration {
      Duration::from_millis(self.check_timeout_ms)
   }

   pub fn change_timeout(&self) -> Duration {
      Duration::from_millis(self.change_timeout_ms)
   }

   pub fn retry_delay(&self) -> Duration {
      Duration::from_millis(self.retry_delay_ms)
   }
}

impl Default for StatusTiming {
   fn default() -> Self {
      Self {
         check_timeout_ms: 5_000,
         change_timeout_ms: 10_000,
         retry_delay_ms: 5_000,
      }
   }
}
