//! Counters and rolling statistics for the sync engine

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of processing durations kept for the rolling mean.
const DURATION_WINDOW: usize = 1000;

#[derive(Debug, Default)]
struct MetricsState {
    files_processed: u64,
    changes_detected: u64,
    errors: u64,
    files_monitored: usize,
    last_change: Option<DateTime<Utc>>,
    durations: VecDeque<Duration>,
}

/// Thread-safe metrics recorder. Counters are written under the lock at each
/// pipeline step; snapshots are taken under the read lock.
#[derive(Debug)]
pub struct MetricsRecorder {
    state: RwLock<MetricsState>,
    started_at: DateTime<Utc>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        MetricsRecorder {
            state: RwLock::new(MetricsState::default()),
            started_at: Utc::now(),
        }
    }

    pub fn record_processed(&self, duration: Duration) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.files_processed += 1;
        state.last_change = Some(Utc::now());
        if state.durations.len() >= DURATION_WINDOW {
            state.durations.pop_front();
        }
        state.durations.push_back(duration);
    }

    pub fn record_change(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.changes_detected += 1;
    }

    pub fn record_error(&self) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.errors += 1;
    }

    pub fn set_files_monitored(&self, count: usize) {
        let mut state = self.state.write().expect("metrics lock poisoned");
        state.files_monitored = count;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().expect("metrics lock poisoned");
        let average = if state.durations.is_empty() {
            0.0
        } else {
            let total: Duration = state.durations.iter().sum();
            total.as_secs_f64() * 1000.0 / state.durations.len() as f64
        };

        MetricsSnapshot {
            files_monitored: state.files_monitored,
            files_processed: state.files_processed,
            changes_detected: state.changes_detected,
            errors: state.errors,
            last_change: state.last_change,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            average_processing_time_ms: average,
        }
    }
}

/// Point-in-time view of the recorder.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub files_monitored: usize,
    pub files_processed: u64,
    pub changes_detected: u64,
    pub errors: u64,
    pub last_change: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub average_processing_time_ms: f64,
}
