//! Video jobs, per-resolution tasks, and their outcomes.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of the manifest written into every video's output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Container extension of every rendered resolution.
pub const RENDITION_EXTENSION: &str = "mp4";

/// One discovered input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
    /// Original file name; the dedup key.
    pub filename: String,
    /// File name without its extension; names the output directory.
    pub video_stem: String,
    /// Path of the source video.
    pub input_path: PathBuf,
    /// `<output root>/<video_stem>`.
    pub output_dir: PathBuf,
}

impl VideoJob {
    /// Derives the job for `filename` found in `input_dir`.
    ///
    /// Returns `None` when the name has no usable stem (e.g. `.mp4`).
    pub fn new(filename: &str, input_dir: &Path, output_root: &Path) -> Option<Self> {
        let stem = Path::new(filename).file_stem()?.to_str()?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }

        Some(Self {
            filename: filename.to_string(),
            video_stem: stem.to_string(),
            input_path: input_dir.join(filename),
            output_dir: output_root.join(stem),
        })
    }

    /// Path of this video's manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE_NAME)
    }

    /// Builds the task rendering `resolution` for this video.
    pub fn task(&self, resolution: &str) -> ResolutionTask {
        ResolutionTask {
            resolution: resolution.to_string(),
            output_file: self
                .output_dir
                .join(format!("{}.{}", resolution, RENDITION_EXTENSION)),
        }
    }
}

/// One resolution-specific transcode unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTask {
    pub resolution: String,
    pub output_file: PathBuf,
}

/// Final status of one resolution task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Transcoder exited with status zero.
    Success,
    /// Transcoder exited non-zero, could not be started, or crashed.
    Failed,
    /// Transcoder exceeded the configured task timeout and was killed.
    TimedOut,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Success => "success",
            ResolutionStatus::Failed => "failed",
            ResolutionStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionStatus::Success)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one [`ResolutionTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub resolution: String,
    pub status: ResolutionStatus,
}

/// Resolution → status mapping that keeps insertion order.
///
/// Serialized as a JSON object whose keys appear in insertion order, which
/// is always the configured resolution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionResults {
    entries: Vec<ResolutionOutcome>,
}

impl ResolutionResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status` for `resolution`, replacing an earlier entry in place.
    pub fn insert(&mut self, resolution: impl Into<String>, status: ResolutionStatus) {
        let resolution = resolution.into();
        match self.entries.iter_mut().find(|o| o.resolution == resolution) {
            Some(existing) => existing.status = status,
            None => self.entries.push(ResolutionOutcome { resolution, status }),
        }
    }

    pub fn get(&self, resolution: &str) -> Option<ResolutionStatus> {
        self.entries
            .iter()
            .find(|o| o.resolution == resolution)
            .map(|o| o.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolutionOutcome> {
        self.entries.iter()
    }

    /// Resolution names in order.
    pub fn resolutions(&self) -> Vec<&str> {
        self.entries.iter().map(|o| o.resolution.as_str()).collect()
    }

    pub fn count(&self, status: ResolutionStatus) -> usize {
        self.entries.iter().filter(|o| o.status == status).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|o| o.status.is_success())
    }
}

impl FromIterator<ResolutionOutcome> for ResolutionResults {
    fn from_iter<I: IntoIterator<Item = ResolutionOutcome>>(iter: I) -> Self {
        let mut results = Self::new();
        for outcome in iter {
            results.insert(outcome.resolution, outcome.status);
        }
        results
    }
}

impl Serialize for ResolutionResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for outcome in &self.entries {
            map.serialize_entry(&outcome.resolution, &outcome.status)?;
        }
        map.end()
    }
}

struct ResolutionResultsVisitor;

impl<'de> Visitor<'de> for ResolutionResultsVisitor {
    type Value = ResolutionResults;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of resolution names to statuses")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut results = ResolutionResults::new();
        while let Some((resolution, status)) = access.next_entry::<String, ResolutionStatus>()? {
            results.insert(resolution, status);
        }
        Ok(results)
    }
}

impl<'de> Deserialize<'de> for ResolutionResults {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ResolutionResultsVisitor)
    }
}
