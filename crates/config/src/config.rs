//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but holds an unusable value
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Resolutions rendered for every video when none are configured.
pub const DEFAULT_RESOLUTIONS: &[&str] = &["360p", "480p", "720p", "1080p"];

/// Directory polling and output layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Flat directory scanned for new videos
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Root under which one directory per video is created
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Extension (without the dot) a file must carry to be picked up
    #[serde(default = "default_video_extension")]
    pub video_extension: String,
    /// Seconds to sleep between directory polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Ordered set of resolutions rendered for every video
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<String>,
    /// Skip files whose output directory already holds a complete manifest
    #[serde(default = "default_skip_completed")]
    pub skip_completed: bool,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_video_extension() -> String {
    "mp4".to_string()
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_resolutions() -> Vec<String> {
    DEFAULT_RESOLUTIONS.iter().map(|r| r.to_string()).collect()
}

fn default_skip_completed() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            video_extension: default_video_extension(),
            poll_interval_secs: default_poll_interval_secs(),
            resolutions: default_resolutions(),
            skip_completed: default_skip_completed(),
        }
    }
}

/// Per-video worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Maximum concurrent transcode invocations for one video
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Resolution the transcoder is told to fail (empty = none)
    #[serde(default)]
    pub fail_resolution: String,
    /// Per-task timeout in seconds (0 = wait forever)
    #[serde(default)]
    pub task_timeout_secs: u64,
}

fn default_max_workers() -> u32 {
    2
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            fail_resolution: String::new(),
            task_timeout_secs: 0,
        }
    }
}

/// External transcoder invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    /// Program executed for every resolution task
    #[serde(default = "default_program")]
    pub program: String,
    /// Script passed as the first argument (empty = run `program` directly)
    #[serde(default = "default_script")]
    pub script: PathBuf,
}

fn default_program() -> String {
    "bash".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/transcode.sh")
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port the HTTP listener binds to
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MAX_WORKERS -> workers.max_workers
    /// - FAIL_RESOLUTION -> workers.fail_resolution
    /// - TASK_TIMEOUT_SECS -> workers.task_timeout_secs
    /// - APP_PORT -> server.port
    /// - APP_BIND -> server.bind_address
    /// - INPUT_DIR / OUTPUT_DIR -> ingest.input_dir / ingest.output_dir
    /// - VIDEO_EXTENSION -> ingest.video_extension
    /// - POLL_INTERVAL_SECS -> ingest.poll_interval_secs
    /// - RESOLUTIONS (comma separated) -> ingest.resolutions
    /// - SKIP_COMPLETED -> ingest.skip_completed
    /// - TRANSCODE_PROGRAM / TRANSCODE_SCRIPT -> transcoder.program / transcoder.script
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MAX_WORKERS") {
            if let Ok(workers) = val.trim().parse::<u32>() {
                self.workers.max_workers = workers;
            }
        }

        // An empty FAIL_RESOLUTION is meaningful: it clears the injection.
        if let Ok(val) = env::var("FAIL_RESOLUTION") {
            self.workers.fail_resolution = val.trim().to_string();
        }

        if let Ok(val) = env::var("TASK_TIMEOUT_SECS") {
            if let Ok(secs) = val.trim().parse::<u64>() {
                self.workers.task_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("APP_PORT") {
            if let Ok(port) = val.trim().parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("APP_BIND") {
            if !val.trim().is_empty() {
                self.server.bind_address = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("INPUT_DIR") {
            if !val.is_empty() {
                self.ingest.input_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("OUTPUT_DIR") {
            if !val.is_empty() {
                self.ingest.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDEO_EXTENSION") {
            let ext = val.trim().trim_start_matches('.');
            if !ext.is_empty() {
                self.ingest.video_extension = ext.to_string();
            }
        }

        if let Ok(val) = env::var("POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.trim().parse::<u64>() {
                self.ingest.poll_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("RESOLUTIONS") {
            let resolutions = parse_resolution_list(&val);
            if !resolutions.is_empty() {
                self.ingest.resolutions = resolutions;
            }
        }

        if let Ok(val) = env::var("SKIP_COMPLETED") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.ingest.skip_completed = true,
                "false" | "0" | "no" => self.ingest.skip_completed = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("TRANSCODE_PROGRAM") {
            if !val.trim().is_empty() {
                self.transcoder.program = val.trim().to_string();
            }
        }

        if let Ok(val) = env::var("TRANSCODE_SCRIPT") {
            self.transcoder.script = PathBuf::from(val.trim());
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "workers.max_workers must be at least 1".to_string(),
            ));
        }

        if self.ingest.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "ingest.poll_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.ingest.video_extension.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.video_extension must not be empty".to_string(),
            ));
        }

        if self.ingest.resolutions.is_empty() {
            return Err(ConfigError::Invalid(
                "ingest.resolutions must name at least one resolution".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for resolution in &self.ingest.resolutions {
            if resolution.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "ingest.resolutions contains an empty entry".to_string(),
                ));
            }
            if !seen.insert(resolution.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "resolution '{}' is listed more than once",
                    resolution
                )));
            }
        }

        Ok(())
    }

    /// True when the forced-failure label names one of the configured resolutions
    pub fn fail_resolution_is_configured(&self) -> bool {
        let fail = self.workers.fail_resolution.as_str();
        !fail.is_empty() && self.ingest.resolutions.iter().any(|r| r == fail)
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, falling back to defaults, then apply the environment
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Split a comma separated resolution list, dropping blank entries
pub fn parse_resolution_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
