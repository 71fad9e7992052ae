/*!
 * Aggregated transfer statistics
 *
 * Historical done/failed/bytes counters, bucketed by time resolution,
 * source, destination and activity. Written by the completion-reporting
 * collaborator, read by ranking strategies.
 */

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::topology::EndpointId;

/// Bucket identity for one counter row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsKey {
    /// Bucket width in seconds
    pub resolution_secs: u64,
    /// Start of the bucket
    pub timestamp: DateTime<Utc>,
    pub src: EndpointId,
    pub dst: EndpointId,
    pub activity: String,
}

/// Counters accumulated within one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsCounters {
    pub files_done: u64,
    pub bytes_done: u64,
    pub files_failed: u64,
}

/// Read access to historical transfer statistics
pub trait StatsProvider: Send + Sync {
    /// Failure rate of a source endpoint, summed across all activities and
    /// destinations within the lookback window. None when no traffic was
    /// recorded.
    fn failure_rate(&self, src: EndpointId, lookback: Duration) -> Option<f64>;
}

/// Provider with no data; used when no statistics backend is wired up
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStats;

impl StatsProvider for NoStats {
    fn failure_rate(&self, _src: EndpointId, _lookback: Duration) -> Option<f64> {
        None
    }
}

/// In-process statistics store for tests and embedders
#[derive(Debug, Default)]
pub struct MemoryStats {
    rows: Mutex<Vec<(StatsKey, StatsCounters)>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one counter row; completion reporting calls this
    pub fn record(&self, key: StatsKey, counters: StatsCounters) {
        self.rows
            .lock()
            .expect("stats mutex poisoned")
            .push((key, counters));
    }
}

impl StatsProvider for MemoryStats {
    fn failure_rate(&self, src: EndpointId, lookback: Duration) -> Option<f64> {
        let cutoff = Utc::now() - lookback;
        let rows = self.rows.lock().expect("stats mutex poisoned");

        let mut done = 0u64;
        let mut failed = 0u64;
        for (key, counters) in rows.iter() {
            if key.src == src && key.timestamp >= cutoff {
                done += counters.files_done;
                failed += counters.files_failed;
            }
        }

        let total = done + failed;
        if total == 0 {
            None
        } else {
            Some(failed as f64 / total as f64)
        }
    }
}
