//! Session statistics.
//!
//! Counters are updated by the worker threads and read by the CLI for the
//! end-of-session summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one sensing session.
#[derive(Debug)]
pub struct SessionStats {
    /// Number of sample batches received
    batches: AtomicU64,
    /// Number of samples received
    samples: AtomicU64,
    /// Number of windows analysed
    windows_analyzed: AtomicU64,
    /// Samples discarded because analysis fell behind
    samples_dropped: AtomicU64,
    /// Batches the input device could not queue
    input_overflows: AtomicU64,
    /// Number of movement episodes completed
    episodes: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            batches: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            windows_analyzed: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            input_overflows: AtomicU64::new(0),
            episodes: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    /// Record a received batch of `len` samples.
    pub fn record_batch(&self, len: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.samples_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record batches lost before they reached the analysis channel.
    pub fn record_input_overflows(&self, count: u64) {
        self.input_overflows.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_episode(&self) {
        self.episodes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            windows_analyzed: self.windows_analyzed.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            input_overflows: self.input_overflows.load(Ordering::Relaxed),
            episodes: self.episodes.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Sample batches received: {}\n\
             - Samples received: {}\n\
             - Windows analysed: {}\n\
             - Samples dropped: {}\n\
             - Input batches lost: {}\n\
             - Movement episodes: {}\n\
             - Session duration: {} seconds",
            stats.batches,
            stats.samples,
            stats.windows_analyzed,
            stats.samples_dropped,
            stats.input_overflows,
            stats.episodes,
            stats.session_duration_secs
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub samples: u64,
    pub windows_analyzed: u64,
    pub samples_dropped: u64,
    #[serde(default)]
    pub input_overflows: u64,
    pub episodes: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared session statistics.
pub type SharedSessionStats = Arc<SessionStats>;
