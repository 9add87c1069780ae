//! Ingestion loop for TranscodeFlow
//!
//! Polls the input directory, admits every new video exactly once through
//! the [`SeenSet`], and processes admitted videos one at a time: fan out the
//! resolutions, then commit the manifest. Nothing that goes wrong with one
//! video stops the loop.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::dispatcher::{DispatchError, ResolutionDispatcher};
use crate::job::VideoJob;
use crate::manifest::{self, Manifest, ManifestError};
use crate::metrics::SharedMetrics;
use crate::readiness::Readiness;
use crate::scan::list_videos;
use crate::seen::SeenSet;

/// Error type for processing a single video
#[derive(Debug, Error)]
pub enum ProcessError {
    /// File name has no stem to name the output directory after
    #[error("'{0}' has no usable file stem")]
    InvalidName(String),

    /// Fan-out could not start
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Results were produced but the manifest could not be committed
    #[error("Manifest commit failed: {0}")]
    Manifest(#[from] ManifestError),

    /// Blocking manifest I/O panicked or was cancelled
    #[error("Manifest I/O task failed: {0}")]
    ManifestTask(#[source] JoinError),
}

/// How processing of one admitted video ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoOutcome {
    /// All resolutions ran and the manifest was committed
    Committed(Manifest),
    /// A complete manifest from an earlier run was found; nothing ran
    AlreadyComplete(Manifest),
}

/// What a single poll did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Video files present in the input directory
    pub listed: usize,
    /// Files admitted to processing for the first time
    pub new_files: usize,
    pub committed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The input directory could not be listed
    pub listing_failed: bool,
}

/// Directory watcher driving the dispatcher and manifest writer
pub struct IngestionLoop {
    input_dir: PathBuf,
    output_dir: PathBuf,
    video_extension: String,
    poll_interval: Duration,
    skip_completed: bool,
    seen: SeenSet,
    dispatcher: ResolutionDispatcher,
    readiness: Readiness,
    metrics: SharedMetrics,
    #[cfg(test)]
    panic_on_video: Option<String>,
}

impl IngestionLoop {
    pub fn new(
        cfg: &IngestConfig,
        dispatcher: ResolutionDispatcher,
        readiness: Readiness,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            input_dir: cfg.input_dir.clone(),
            output_dir: cfg.output_dir.clone(),
            video_extension: cfg.video_extension.clone(),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs.max(1)),
            skip_completed: cfg.skip_completed,
            seen: SeenSet::new(),
            dispatcher,
            readiness,
            metrics,
            #[cfg(test)]
            panic_on_video: None,
        }
    }

    /// Override the sleep between polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Poll forever, until `shutdown` is cancelled
    ///
    /// Flips readiness before the first poll. Cancellation is honoured
    /// between videos and while sleeping; a video already being processed
    /// is always finished first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            input_dir = %self.input_dir.display(),
            output_dir = %self.output_dir.display(),
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Watching input directory for new videos"
        );
        self.readiness.mark_ready();

        loop {
            let summary = self.tick(&shutdown).await;
            if summary.new_files > 0 {
                debug!(?summary, "Poll finished");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(videos_seen = self.seen.len(), "Ingestion loop stopped");
    }

    /// One poll: list the input directory and process every new video
    pub async fn tick(&mut self, shutdown: &CancellationToken) -> TickSummary {
        let mut summary = TickSummary::default();

        let dir = self.input_dir.clone();
        let extension = self.video_extension.clone();
        let names = match tokio::task::spawn_blocking(move || list_videos(&dir, &extension)).await
        {
            Ok(Ok(names)) => names,
            Ok(Err(e)) => {
                warn!(
                    input_dir = %self.input_dir.display(),
                    error = %e,
                    "Failed to list input directory"
                );
                summary.listing_failed = true;
                return summary;
            }
            Err(join_err) => {
                error!(error = %join_err, "Directory listing task panicked");
                summary.listing_failed = true;
                return summary;
            }
        };
        summary.listed = names.len();

        for name in names {
            if shutdown.is_cancelled() {
                break;
            }
            // Admit before processing so a file is never dispatched twice
            if !self.seen.mark_seen(&name) {
                continue;
            }
            summary.new_files += 1;

            {
                let mut m = self.metrics.write().await;
                m.videos_seen += 1;
                m.current_video = Some(name.clone());
                m.touch();
            }

            let result = AssertUnwindSafe(self.process_video(&name))
                .catch_unwind()
                .await;

            let mut m = self.metrics.write().await;
            m.current_video = None;
            m.touch();

            match result {
                Ok(Ok(VideoOutcome::Committed(_))) => {
                    summary.committed += 1;
                    m.videos_completed += 1;
                }
                Ok(Ok(VideoOutcome::AlreadyComplete(_))) => {
                    summary.skipped += 1;
                    m.videos_skipped += 1;
                }
                Ok(Err(e)) => {
                    error!(video = %name, error = %e, "Failed to process video");
                    summary.failed += 1;
                    m.videos_failed += 1;
                }
                Err(panic) => {
                    error!(
                        video = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Processing video panicked"
                    );
                    summary.failed += 1;
                    m.videos_failed += 1;
                }
            }
        }

        summary
    }

    /// Fan out every resolution of `filename` and commit its manifest
    pub async fn process_video(&self, filename: &str) -> Result<VideoOutcome, ProcessError> {
        let job = VideoJob::new(filename, &self.input_dir, &self.output_dir)
            .ok_or_else(|| ProcessError::InvalidName(filename.to_string()))?;
        let manifest_path = job.manifest_path();

        self.fail_point(filename);

        if self.skip_completed {
            let path = manifest_path.clone();
            let video = job.filename.clone();
            let existing =
                tokio::task::spawn_blocking(move || manifest::load_completed(&path, &video))
                    .await
                    .map_err(ProcessError::ManifestTask)?;
            if let Some(existing) = existing {
                info!(
                    video = %job.filename,
                    manifest = %manifest_path.display(),
                    "Complete manifest already present, skipping"
                );
                return Ok(VideoOutcome::AlreadyComplete(existing));
            }
        }

        info!(video = %job.filename, "Processing video");

        let results = self.dispatcher.dispatch(&job).await?;
        self.metrics.write().await.record_results(&results);

        let manifest = Manifest::new(job.filename.clone(), results);
        let path = manifest_path.clone();
        let to_commit = manifest.clone();
        tokio::task::spawn_blocking(move || manifest::commit(&path, &to_commit))
            .await
            .map_err(ProcessError::ManifestTask)??;

        info!(
            video = %job.filename,
            manifest = %manifest_path.display(),
            "Finished processing video"
        );

        Ok(VideoOutcome::Committed(manifest))
    }
}

impl IngestionLoop {
    #[cfg(test)]
    fn fail_point(&self, filename: &str) {
        if self.panic_on_video.as_deref() == Some(filename) {
            panic!("injected failure while processing {}", filename);
        }
    }

    #[cfg(not(test))]
    fn fail_point(&self, _filename: &str) {}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
