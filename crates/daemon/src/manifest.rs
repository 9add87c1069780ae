//! Manifest writer for atomic result commits.
//!
//! A manifest records which resolutions of one video were rendered. It is
//! written to a temporary file next to its final path, flushed to storage,
//! and renamed into place, so a reader of the final path only ever sees the
//! previous manifest or the complete new one.

use serde::{Deserialize, Serialize};
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::job::ResolutionResults;

/// Errors that can occur while committing or reading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest could not be encoded as JSON.
    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Writing or flushing the temporary file failed.
    #[error("Failed to write manifest {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving the temporary file over the final path failed.
    #[error("Failed to rename manifest into place at {}: {source}", .path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading an existing manifest failed.
    #[error("Failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An existing manifest is not well-formed.
    #[error("Malformed manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable result document for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Original input file name.
    pub video: String,
    /// One status per configured resolution, in configured order.
    pub results: ResolutionResults,
}

impl Manifest {
    pub fn new(video: impl Into<String>, results: ResolutionResults) -> Self {
        Self {
            video: video.into(),
            results,
        }
    }

    /// Encodes the manifest as four-space indented JSON.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut buf = Vec::new();
        let mut serializer =
            Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.serialize(&mut serializer)
            .map_err(ManifestError::Serialize)?;
        buf.push(b'\n');
        Ok(buf)
    }
}

/// Generates the temporary path used while committing `final_path`.
///
/// The temporary file lives in the same directory so the final rename never
/// crosses a filesystem: `manifest.json` -> `.manifest.json.<uuid>.tmp`.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest".to_string());
    let temp_name = format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple());
    final_path.with_file_name(temp_name)
}

/// Atomically commits `manifest` at `path`, replacing any previous manifest.
///
/// On failure the temporary file is removed and whatever was at `path`
/// before is left untouched.
pub fn commit(path: &Path, manifest: &Manifest) -> Result<(), ManifestError> {
    let bytes = manifest.to_json_bytes()?;
    let temp = temp_path_for(path);

    if let Err(source) = write_synced(&temp, &bytes) {
        let _ = fs::remove_file(&temp);
        return Err(ManifestError::Write { path: temp, source });
    }

    if let Err(source) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(ManifestError::Rename {
            path: path.to_path_buf(),
            source,
        });
    }

    sync_parent_dir(path);

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Persist the rename itself. Best effort.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Reads and parses the manifest at `path`.
pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let content = fs::read(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Returns the manifest at `path` if it exists, parses, and belongs to `video`.
pub fn load_completed(path: &Path, video: &str) -> Option<Manifest> {
    match load(path) {
        Ok(manifest) if manifest.video == video => Some(manifest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ResolutionStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_manifest(video: &str, failed: &[&str]) -> Manifest {
        let mut results = ResolutionResults::new();
        for resolution in ["360p", "480p", "720p", "1080p"] {
            let status = if failed.contains(&resolution) {
                ResolutionStatus::Failed
            } else {
                ResolutionStatus::Success
            };
            results.insert(resolution, status);
        }
        Manifest::new(video, results)
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_temp_path_is_colocated_and_unique() {
        let final_path = Path::new("/srv/output/demo/manifest.json");
        let a = temp_path_for(final_path);
        let b = temp_path_for(final_path);

        assert_eq!(a.parent(), final_path.parent());
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".manifest.json."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_manifest_json_shape() {
        let manifest = sample_manifest("demo.mp4", &[]);
        let value: serde_json::Value =
            serde_json::from_slice(&manifest.to_json_bytes().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "video": "demo.mp4",
                "results": {
                    "360p": "success",
                    "480p": "success",
                    "720p": "success",
                    "1080p": "success"
                }
            })
        );

        // Key order follows the configured resolution order
        let text = String::from_utf8(manifest.to_json_bytes().unwrap()).unwrap();
        let positions: Vec<usize> = ["360p", "480p", "720p", "1080p"]
            .iter()
            .map(|r| text.find(r).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_commit_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        let manifest = sample_manifest("demo.mp4", &["720p"]);

        commit(&path, &manifest).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.results.get("720p"), Some(ResolutionStatus::Failed));
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }

    #[test]
    fn test_commit_replaces_existing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");

        commit(&path, &sample_manifest("demo.mp4", &["360p", "480p"])).unwrap();
        commit(&path, &sample_manifest("demo.mp4", &[])).unwrap();

        let loaded = load(&path).unwrap();
        assert!(loaded.results.all_succeeded());
    }

    #[test]
    fn test_commit_failure_keeps_previous_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        let previous = sample_manifest("demo.mp4", &[]);
        commit(&path, &previous).unwrap();

        // Renaming a file over a non-empty directory always fails
        let blocked = temp_dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();

        let result = commit(&blocked, &sample_manifest("demo.mp4", &["720p"]));
        assert!(matches!(result, Err(ManifestError::Rename { .. })));
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
        assert_eq!(load(&path).unwrap(), previous);
    }

    #[test]
    fn test_commit_into_missing_directory_is_write_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("manifest.json");

        let result = commit(&path, &sample_manifest("demo.mp4", &[]));
        assert!(matches!(result, Err(ManifestError::Write { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_malformed_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        fs::write(&path, br#"{"video": "demo.mp4", "results": {"360p": "succ"#).unwrap();

        assert!(matches!(load(&path), Err(ManifestError::Parse { .. })));
        assert!(load_completed(&path, "demo.mp4").is_none());
    }

    #[test]
    fn test_load_completed_checks_video_name() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        commit(&path, &sample_manifest("demo.mp4", &[])).unwrap();

        assert!(load_completed(&path, "demo.mp4").is_some());
        assert!(load_completed(&path, "demo.mov").is_none());
        assert!(load_completed(&temp_dir.path().join("absent.json"), "demo.mp4").is_none());
    }

    // A reader polling the final path while a writer commits repeatedly must
    // never observe a truncated or partial document.
    #[test]
    fn test_concurrent_reader_never_sees_partial_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("manifest.json");
        commit(&path, &sample_manifest("seed.mp4", &[])).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let path = path.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut observed = 0usize;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let bytes = fs::read(&path).expect("manifest vanished during commit");
                    let parsed: Result<Manifest, _> = serde_json::from_slice(&bytes);
                    assert!(
                        parsed.is_ok(),
                        "observed partial manifest: {:?}",
                        String::from_utf8_lossy(&bytes)
                    );
                    observed += 1;
                    if finished {
                        break;
                    }
                }
                observed
            })
        };

        for i in 0..300 {
            // Vary the document size so a torn write would be visible
            let mut results = ResolutionResults::new();
            for n in 0..(1 + i % 40) {
                results.insert(format!("{}p", 100 + n), ResolutionStatus::Success);
            }
            commit(&path, &Manifest::new(format!("video-{}.mp4", i), results)).unwrap();
        }

        done.store(true, Ordering::Release);
        let observed = reader.join().expect("reader thread panicked");
        assert!(observed > 0);
        assert!(leftover_temp_files(temp_dir.path()).is_empty());
    }
}
