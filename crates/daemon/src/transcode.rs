//! External transcoder invocation
//!
//! The transcoder is an opaque external process called with four positional
//! arguments: input path, output path, resolution label and the forced-failure
//! resolution label (empty for none). Exit status zero means the rendition was
//! produced.
//!
//! On unix every invocation runs in its own process group, so a timeout kills
//! whatever the transcoder started (a shell script's ffmpeg, for example) and
//! not just the direct child.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

use crate::config::TranscoderConfig;

/// Error type for transcode operations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Transcoder exited with non-zero status
    #[error("transcoder failed with exit code: {0}")]
    Failed(i32),

    /// Transcoder was terminated by signal
    #[error("transcoder was terminated by signal")]
    Terminated,

    /// Transcoder ran past the request's timeout and was killed
    #[error("transcoder timed out after {0:?}")]
    TimedOut(Duration),

    /// Transcoder could not be spawned or waited on
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the transcoder needs for one resolution of one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub resolution: String,
    /// Resolution the transcoder must fail on; empty means none
    pub fail_resolution: String,
    /// Kill the invocation once it runs this long; `None` waits forever
    pub timeout: Option<Duration>,
}

/// Something that can render one resolution of a video.
///
/// Implementations block their caller until the rendition finished. When
/// `request.timeout` elapses they must stop every piece of work they started
/// before returning [`TranscodeError::TimedOut`]. Dropping the returned
/// future must abandon the work.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<(), TranscodeError>;
}

/// Runs an external program (usually `bash scripts/transcode.sh`) per request
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: String,
    script: Option<PathBuf>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<String>, script: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script,
        }
    }

    pub fn from_config(cfg: &TranscoderConfig) -> Self {
        let script = if cfg.script.as_os_str().is_empty() {
            None
        } else {
            Some(cfg.script.clone())
        };
        Self::new(cfg.program.clone(), script)
    }

    /// Build the transcoder command for a request
    ///
    /// The child leads a new process group on unix and is killed if its
    /// handle is dropped.
    pub fn build_command(&self, request: &TranscodeRequest) -> Command {
        let mut cmd = Command::new(&self.program);

        if let Some(script) = &self.script {
            cmd.arg(script);
        }

        cmd.arg(&request.input_path)
            .arg(&request.output_path)
            .arg(&request.resolution)
            .arg(&request.fail_resolution);

        cmd.stdin(Stdio::null()).kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// Kills a transcoder's process group unless disarmed
///
/// Must fire before the group leader is reaped, while its pid still names
/// the group.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a stale group yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, error = %err, "Failed to kill transcoder process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<(), TranscodeError> {
        let mut child = self.build_command(request).spawn()?;
        let mut group = ProcessGroupGuard::new(child.id());

        let status = match request.timeout {
            None => child.wait().await?,
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    group.kill();
                    let _ = child.start_kill();
                    // Reap so the worker slot is only freed once the child is gone
                    let _ = child.wait().await;
                    return Err(TranscodeError::TimedOut(limit));
                }
            },
        };
        group.disarm();

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(TranscodeError::Failed(code)),
                None => Err(TranscodeError::Terminated),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    /// Helper to convert Command args to a Vec of strings for easier testing
    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    fn request(resolution: &str, fail: &str) -> TranscodeRequest {
        TranscodeRequest {
            input_path: PathBuf::from("input/demo.mp4"),
            output_path: PathBuf::from(format!("output/demo/{}.mp4", resolution)),
            resolution: resolution.to_string(),
            fail_resolution: fail.to_string(),
            timeout: None,
        }
    }

    #[test]
    fn test_command_with_script() {
        let transcoder =
            CommandTranscoder::new("bash", Some(PathBuf::from("scripts/transcode.sh")));
        let cmd = transcoder.build_command(&request("720p", ""));

        assert_eq!(cmd.as_std().get_program(), OsStr::new("bash"));
        assert_eq!(
            get_command_args(&cmd),
            vec![
                "scripts/transcode.sh",
                "input/demo.mp4",
                "output/demo/720p.mp4",
                "720p",
                "",
            ]
        );
    }

    #[test]
    fn test_from_config_with_empty_script_runs_program_directly() {
        let cfg = TranscoderConfig {
            program: "/usr/local/bin/render".to_string(),
            script: PathBuf::new(),
        };
        let transcoder = CommandTranscoder::from_config(&cfg);
        let cmd = transcoder.build_command(&request("360p", "1080p"));

        assert_eq!(cmd.as_std().get_program(), OsStr::new("/usr/local/bin/render"));
        assert_eq!(get_command_args(&cmd).len(), 4);
        assert_eq!(get_command_args(&cmd)[3], "1080p");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // The four collaborator arguments always trail the script, in order
        #[test]
        fn prop_positional_arguments(
            input in "[a-zA-Z0-9_/.-]{1,40}",
            output in "[a-zA-Z0-9_/.-]{1,40}",
            resolution in "[0-9]{3,4}p",
            fail in prop_oneof![Just(String::new()), "[0-9]{3,4}p"],
        ) {
            let transcoder = CommandTranscoder::new("bash", Some(PathBuf::from("t.sh")));
            let req = TranscodeRequest {
                input_path: PathBuf::from(&input),
                output_path: PathBuf::from(&output),
                resolution: resolution.clone(),
                fail_resolution: fail.clone(),
                timeout: None,
            };
            let args = get_command_args(&transcoder.build_command(&req));

            prop_assert_eq!(args, vec!["t.sh".to_string(), input, output, resolution, fail]);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_mapping() {
        let ok = CommandTranscoder::new("sh", Some(PathBuf::from("-c")));
        // `sh -c <cmd> <output> <resolution> <fail>` binds $0, $1 and $2
        let mut req = request("720p", "720p");
        req.input_path = PathBuf::from(r#"[ "$1" = "$2" ] && exit 1; exit 0"#);
        assert!(matches!(
            ok.transcode(&req).await,
            Err(TranscodeError::Failed(1))
        ));

        req.fail_resolution = String::new();
        assert!(ok.transcode(&req).await.is_ok());
    }

    // The script's own child dies with it when the timeout fires
    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_grandchild() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = temp_dir.path().join("slow.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nsh -c 'sleep 1; echo late > \"$0\"' \"$2\"\n",
        )
        .unwrap();
        let output = temp_dir.path().join("360p.mp4");

        let transcoder = CommandTranscoder::new("sh", Some(script));
        let mut req = request("360p", "");
        req.output_path = output.clone();
        req.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = transcoder.transcode(&req).await;
        assert!(matches!(result, Err(TranscodeError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!output.exists(), "grandchild wrote output after timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fast_transcoder_within_timeout_succeeds() {
        let ok = CommandTranscoder::new("sh", Some(PathBuf::from("-c")));
        let mut req = request("720p", "");
        req.input_path = PathBuf::from("exit 0");
        req.timeout = Some(Duration::from_secs(5));
        assert!(ok.transcode(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let transcoder = CommandTranscoder::new("/nonexistent/transcoder-binary", None);
        let result = transcoder.transcode(&request("360p", "")).await;
        assert!(matches!(result, Err(TranscodeError::Io(_))));
    }
}
