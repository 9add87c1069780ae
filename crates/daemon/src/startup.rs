//! Startup checks module for TranscodeFlow
//!
//! Preflight work done before the pipeline starts:
//! - Input and output directories exist (created if missing)
//! - The transcode script, when one is configured, is a readable file
//! - A forced-failure label that matches nothing is reported

use crate::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exists but is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Transcode script not found at {}", .0.display())]
    ScriptMissing(PathBuf),

    #[error("Transcode script {} is not a regular file", .0.display())]
    ScriptNotAFile(PathBuf),
}

/// Create `dir` and its parents if missing
pub fn ensure_directory(dir: &Path) -> Result<(), StartupError> {
    if dir.exists() && !dir.is_dir() {
        return Err(StartupError::NotADirectory(dir.to_path_buf()));
    }

    fs::create_dir_all(dir).map_err(|source| StartupError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Create the input and output directories
pub fn prepare_directories(cfg: &Config) -> Result<(), StartupError> {
    ensure_directory(&cfg.ingest.input_dir)?;
    ensure_directory(&cfg.ingest.output_dir)?;
    Ok(())
}

/// Check the configured transcode script exists
///
/// An empty script path means the program is invoked directly and there is
/// nothing to check.
pub fn check_transcode_script(cfg: &Config) -> Result<(), StartupError> {
    let script = &cfg.transcoder.script;
    if script.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(script) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(StartupError::ScriptNotAFile(script.clone())),
        Err(_) => Err(StartupError::ScriptMissing(script.clone())),
    }
}

/// Warn when the forced-failure label names no configured resolution
///
/// Returns `true` when a warning was emitted.
pub fn warn_on_unmatched_fail_resolution(cfg: &Config) -> bool {
    let fail = cfg.workers.fail_resolution.as_str();
    if fail.is_empty() || cfg.fail_resolution_is_configured() {
        return false;
    }

    warn!(
        fail_resolution = %fail,
        resolutions = ?cfg.ingest.resolutions,
        "FAIL_RESOLUTION matches no configured resolution and will never trigger"
    );
    true
}

/// Run all startup checks in order
///
/// 1. Input/output directories
/// 2. Transcode script
/// 3. Forced-failure label (warning only)
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    prepare_directories(cfg)?;
    check_transcode_script(cfg)?;
    warn_on_unmatched_fail_resolution(cfg);

    info!(
        input_dir = %cfg.ingest.input_dir.display(),
        output_dir = %cfg.ingest.output_dir.display(),
        max_workers = cfg.workers.max_workers,
        fail_resolution = %cfg.workers.fail_resolution,
        "Startup checks passed"
    );
    Ok(())
}
