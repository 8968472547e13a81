use std::time::Duration;

use crate::limits::DEFAULT_MAX_BOOKING_HOURS;
use crate::model::{Ms, MS_PER_HOUR};

/// Knobs for the scheduler and its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on every store call and on waiting for the per-field lock.
    pub store_timeout: Duration,
    pub max_booking_duration_ms: Ms,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            max_booking_duration_ms: DEFAULT_MAX_BOOKING_HOURS * MS_PER_HOUR,
            compact_threshold: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Read `FIELDBOOK_*` variables, keeping the default for anything missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let store_timeout = lookup("FIELDBOOK_STORE_TIMEOUT_MS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);
        let max_booking_duration_ms = lookup("FIELDBOOK_MAX_BOOKING_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .map(|h| h * MS_PER_HOUR)
            .unwrap_or(defaults.max_booking_duration_ms);
        let compact_threshold = lookup("FIELDBOOK_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        Self {
            store_timeout,
            max_booking_duration_ms,
            compact_threshold,
        }
    }
}
