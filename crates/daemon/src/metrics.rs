//! Metrics module for TranscodeFlow
//!
//! Pipeline counters shared between the ingestion loop, the dispatcher and
//! the HTTP surface, with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::job::{ResolutionResults, ResolutionStatus};

/// Snapshot of pipeline progress since process start
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineMetrics {
    pub updated_at_unix_ms: i64,
    /// Video currently being fanned out, if any
    pub current_video: Option<String>,
    pub videos_seen: u64,
    pub videos_completed: u64,
    /// Videos skipped because a complete manifest already existed
    pub videos_skipped: u64,
    /// Videos whose processing ended without a committed manifest
    pub videos_failed: u64,
    pub resolutions_succeeded: u64,
    pub resolutions_failed: u64,
    pub resolutions_timed_out: u64,
    /// Transcoder invocations running right now
    pub tasks_in_flight: usize,
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<PipelineMetrics>>;

/// Create a new shared metrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(PipelineMetrics::default()))
}

impl PipelineMetrics {
    /// Fold one video's results into the resolution counters
    pub fn record_results(&mut self, results: &ResolutionResults) {
        self.resolutions_succeeded += results.count(ResolutionStatus::Success) as u64;
        self.resolutions_failed += results.count(ResolutionStatus::Failed) as u64;
        self.resolutions_timed_out += results.count(ResolutionStatus::TimedOut) as u64;
    }

    pub fn touch(&mut self) {
        self.updated_at_unix_ms = current_timestamp_ms();
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
