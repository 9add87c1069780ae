//! TranscodeFlow
//!
//! Watches an input directory for new videos, renders every configured
//! resolution through an external transcoder on a bounded worker pool, and
//! commits one manifest per video atomically.

pub mod daemon;
pub mod dispatcher;
pub mod ingest;
pub mod job;
pub mod manifest;
pub mod metrics;
pub mod readiness;
pub mod scan;
pub mod seen;
pub mod server;
pub mod startup;
pub mod transcode;

pub use transcodeflow_config as config;
pub use transcodeflow_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use dispatcher::{DispatchError, DispatcherConfig, ResolutionDispatcher};
pub use ingest::{IngestionLoop, ProcessError, TickSummary, VideoOutcome};
pub use job::{
    ResolutionOutcome, ResolutionResults, ResolutionStatus, ResolutionTask, VideoJob,
    MANIFEST_FILE_NAME,
};
pub use manifest::{Manifest, ManifestError};
pub use metrics::{new_shared_metrics, PipelineMetrics, SharedMetrics};
pub use readiness::Readiness;
pub use scan::{has_video_extension, list_videos};
pub use seen::SeenSet;
pub use server::{create_router, run_server, AppState, ServerError};
pub use startup::{prepare_directories, run_startup_checks, StartupError};
pub use transcode::{CommandTranscoder, TranscodeError, TranscodeRequest, Transcoder};
