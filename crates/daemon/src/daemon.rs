//! Daemon startup and main loop for TranscodeFlow
//!
//! Wires configuration, the transcoder, the ingestion loop and the HTTP
//! server together and runs them until shutdown.

use crate::config::{Config, ConfigError};
use crate::dispatcher::{DispatcherConfig, ResolutionDispatcher};
use crate::ingest::IngestionLoop;
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::readiness::Readiness;
use crate::server::{self, AppState, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use crate::transcode::{CommandTranscoder, Transcoder};
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// HTTP server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Invalid bind address '{address}': {source}")]
    InvalidBindAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    /// A background task panicked
    #[error("{task} task failed: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: JoinError,
    },
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Flipped by the ingestion loop, read by /health
    pub readiness: Readiness,
    transcoder: Arc<dyn Transcoder>,
}

impl Daemon {
    /// Initialize the daemon from an optional config file
    ///
    /// Loads the file (or defaults), applies environment overrides,
    /// validates, then runs startup checks.
    pub fn new(config_path: Option<&Path>) -> Result<Self, DaemonError> {
        let config = Config::load_or_default(config_path)?;
        Self::with_config(config)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without running startup checks
    pub fn new_without_checks(config: Config) -> Self {
        let transcoder = Arc::new(CommandTranscoder::from_config(&config.transcoder));
        Self {
            config,
            metrics: new_shared_metrics(),
            readiness: Readiness::new(),
            transcoder,
        }
    }

    /// Replace the transcoder used for every resolution task
    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Address the HTTP server binds to
    pub fn server_addr(&self) -> Result<SocketAddr, DaemonError> {
        let address = &self.config.server.bind_address;
        let ip: IpAddr = address
            .parse()
            .map_err(|source| DaemonError::InvalidBindAddress {
                address: address.clone(),
                source,
            })?;
        Ok(SocketAddr::new(ip, self.config.server.port))
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            readiness: self.readiness.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Build the ingestion loop with a fresh dispatcher and seen set
    pub fn build_ingestion_loop(&self) -> IngestionLoop {
        let dispatcher = ResolutionDispatcher::new(
            DispatcherConfig::from_config(&self.config),
            self.transcoder.clone(),
            self.metrics.clone(),
        );
        IngestionLoop::new(
            &self.config.ingest,
            dispatcher,
            self.readiness.clone(),
            self.metrics.clone(),
        )
    }

    /// Bind the configured address and run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        let addr = self.server_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run the HTTP server and the ingestion loop on `listener`
    ///
    /// Either task stopping stops the other. The ingestion loop finishes the
    /// video it is working on before returning.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), DaemonError> {
        info!(
            max_workers = self.config.workers.max_workers,
            resolutions = ?self.config.ingest.resolutions,
            "Starting TranscodeFlow"
        );

        let mut server_handle = tokio::spawn(server::serve(
            listener,
            self.app_state(),
            shutdown.clone(),
        ));
        let mut ingest_handle = tokio::spawn(self.build_ingestion_loop().run(shutdown.clone()));

        tokio::select! {
            ingest = &mut ingest_handle => {
                shutdown.cancel();
                let server = server_handle.await;
                ingest.map_err(|source| DaemonError::Task { task: "ingestion", source })?;
                flatten_server(server)
            }
            server = &mut server_handle => {
                if let Ok(Err(e)) = &server {
                    error!(error = %e, "HTTP server stopped unexpectedly");
                }
                shutdown.cancel();
                if let Err(source) = ingest_handle.await {
                    error!(error = %source, "Ingestion task failed");
                }
                flatten_server(server)
            }
        }
    }
}

fn flatten_server(result: Result<Result<(), ServerError>, JoinError>) -> Result<(), DaemonError> {
    result.map_err(|source| DaemonError::Task {
        task: "server",
        source,
    })??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::RecordingTranscoder;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn create_test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.ingest.input_dir = root.join("input");
        config.ingest.output_dir = root.join("output");
        config.ingest.poll_interval_secs = 1;
        config.transcoder.script = root.join("transcode.sh");
        config
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_daemon_initialization_without_checks() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(temp_dir.path());
        let daemon = Daemon::new_without_checks(config.clone());

        assert_eq!(daemon.config, config);
        assert!(!daemon.readiness.is_ready());
        assert_eq!(
            daemon.server_addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_with_config_runs_startup_checks() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(temp_dir.path());

        let result = Daemon::with_config(config.clone());
        assert!(matches!(
            result,
            Err(DaemonError::Startup(StartupError::ScriptMissing(_)))
        ));

        fs::write(&config.transcoder.script, "#!/bin/sh\nexit 0\n").unwrap();
        let daemon = Daemon::with_config(config.clone()).unwrap();
        assert!(daemon.config.ingest.input_dir.is_dir());
        assert!(daemon.config.ingest.output_dir.is_dir());
    }

    #[test]
    fn test_invalid_bind_address() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.server.bind_address = "not-an-ip".to_string();

        let daemon = Daemon::new_without_checks(config);
        assert!(matches!(
            daemon.server_addr(),
            Err(DaemonError::InvalidBindAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_daemon_processes_video_and_reports_healthy() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(temp_dir.path());
        fs::create_dir_all(&config.ingest.input_dir).unwrap();
        fs::create_dir_all(&config.ingest.output_dir).unwrap();
        fs::write(config.ingest.input_dir.join("demo.mp4"), b"video").unwrap();

        let transcoder = Arc::new(RecordingTranscoder::default());
        let daemon = Daemon::new_without_checks(config.clone()).with_transcoder(transcoder.clone());
        let metrics = daemon.metrics.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(daemon.run_with_listener(listener, token.clone()));

        let manifest_path = config.ingest.output_dir.join("demo/manifest.json");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !manifest_path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("manifest should be committed");

        let health = http_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"), "got: {}", health);
        assert!(health.contains(r#"{"status":"healthy"}"#));

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(transcoder.call_count(), 4);
        assert_eq!(metrics.read().await.videos_completed, 1);
    }
}
