//! Resolution dispatcher for TranscodeFlow
//!
//! Fans one video out into its resolution tasks, runs them on a worker pool
//! bounded by a semaphore, and joins every task before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::job::{ResolutionResults, ResolutionStatus, ResolutionTask, VideoJob};
use crate::metrics::SharedMetrics;
use crate::transcode::{TranscodeError, TranscodeRequest, Transcoder};

/// Error type for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The per-video output directory could not be created
    #[error("Failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker pool semaphore was closed underneath us
    #[error("Worker pool closed: {0}")]
    WorkerPoolClosed(#[from] AcquireError),
}

/// Settings the dispatcher needs from the daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Maximum concurrent transcoder invocations for one video
    pub max_workers: usize,
    /// Resolutions rendered for every video, in manifest order
    pub resolutions: Vec<String>,
    /// Forwarded verbatim to the transcoder; empty means none
    pub fail_resolution: String,
    /// Per-task limit; `None` waits forever
    pub task_timeout: Option<Duration>,
}

impl DispatcherConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let task_timeout = match cfg.workers.task_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            max_workers: cfg.workers.max_workers as usize,
            resolutions: cfg.ingest.resolutions.clone(),
            fail_resolution: cfg.workers.fail_resolution.clone(),
            task_timeout,
        }
    }
}

/// Runs the resolution tasks of one video with bounded concurrency
///
/// Uses a tokio Semaphore sized to `max_workers`; a permit is held by each
/// task for the whole transcoder invocation.
pub struct ResolutionDispatcher {
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
    transcoder: Arc<dyn Transcoder>,
    metrics: SharedMetrics,
}

impl ResolutionDispatcher {
    pub fn new(
        config: DispatcherConfig,
        transcoder: Arc<dyn Transcoder>,
        metrics: SharedMetrics,
    ) -> Self {
        let permits = config.max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            transcoder,
            metrics,
        }
    }

    /// Get the number of idle worker slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Render every configured resolution of `job`
    ///
    /// Tasks are submitted in configured order and may finish in any order.
    /// The returned results hold exactly one entry per configured resolution,
    /// in configured order; a failing task never affects its siblings.
    pub async fn dispatch(&self, job: &VideoJob) -> Result<ResolutionResults, DispatchError> {
        tokio::fs::create_dir_all(&job.output_dir)
            .await
            .map_err(|source| DispatchError::OutputDir {
                path: job.output_dir.clone(),
                source,
            })?;

        info!(
            video = %job.filename,
            max_workers = self.config.max_workers,
            fail_resolution = %self.config.fail_resolution,
            "Dispatching resolution tasks"
        );

        let mut handles = Vec::with_capacity(self.config.resolutions.len());

        for resolution in &self.config.resolutions {
            let task = job.task(resolution);
            // Waiting here keeps submission in configured order
            let permit = self.semaphore.clone().acquire_owned().await?;

            let request = TranscodeRequest {
                input_path: job.input_path.clone(),
                output_path: task.output_file.clone(),
                resolution: task.resolution.clone(),
                fail_resolution: self.config.fail_resolution.clone(),
                timeout: self.config.task_timeout,
            };

            let handle = tokio::spawn(run_task(
                task.clone(),
                request,
                self.transcoder.clone(),
                self.metrics.clone(),
                permit,
            ));
            handles.push((task.resolution, handle));
        }

        let mut results = ResolutionResults::new();

        for (resolution, handle) in handles {
            let status = match handle.await {
                Ok(status) => status,
                Err(join_err) => {
                    error!(
                        video = %job.filename,
                        resolution = %resolution,
                        error = %join_err,
                        "Resolution task panicked"
                    );
                    let mut metrics = self.metrics.write().await;
                    metrics.tasks_in_flight = metrics.tasks_in_flight.saturating_sub(1);
                    ResolutionStatus::Failed
                }
            };
            results.insert(resolution, status);
        }

        info!(
            video = %job.filename,
            succeeded = results.count(ResolutionStatus::Success),
            failed = results.count(ResolutionStatus::Failed),
            timed_out = results.count(ResolutionStatus::TimedOut),
            "All resolution tasks finished"
        );

        Ok(results)
    }
}

/// Execute one resolution task while holding a worker permit
async fn run_task(
    task: ResolutionTask,
    request: TranscodeRequest,
    transcoder: Arc<dyn Transcoder>,
    metrics: SharedMetrics,
    _permit: OwnedSemaphorePermit,
) -> ResolutionStatus {
    metrics.write().await.tasks_in_flight += 1;
    debug!(resolution = %task.resolution, output = %task.output_file.display(), "Transcode started");

    // Timeouts are enforced by the transcoder, which reaps what it started
    // before returning
    let status = match transcoder.transcode(&request).await {
        Ok(()) => {
            debug!(resolution = %task.resolution, "Transcode succeeded");
            ResolutionStatus::Success
        }
        Err(TranscodeError::TimedOut(limit)) => {
            warn!(
                resolution = %task.resolution,
                timeout_secs = limit.as_secs_f64(),
                "Transcode timed out"
            );
            ResolutionStatus::TimedOut
        }
        Err(e) => {
            warn!(resolution = %task.resolution, error = %e, "Transcode failed");
            ResolutionStatus::Failed
        }
    };

    let mut m = metrics.write().await;
    m.tasks_in_flight = m.tasks_in_flight.saturating_sub(1);

    status
}
