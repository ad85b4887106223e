//! Keel Runner
//!
//! A single-flight worker that claims deployment jobs from the control plane,
//! builds and ships them, and reports the outcome.
//!
//! Architecture:
//! - Configuration: Load settings from the environment once at startup
//! - Repositories: HTTP communication with the control plane (lease, report)
//! - Services: Planning, stage execution under the lease, report delivery
//! - Scheduler: The claim → execute → report loop and lease renewal
//!
//! Each claimed job is executed only while its lease holds. Results are
//! reported with bounded retries; a job whose lease lapsed is abandoned
//! silently so the control plane can hand it to another runner.

mod backoff;
mod config;
mod lease;
mod repository;
mod scheduler;
mod service;
mod toolchain;

#[cfg(test)]
mod testing;

/// Rotated log files kept before the oldest is deleted
const LOG_FILES_KEPT: usize = 30;

use anyhow::{Context, Result};
use keel_client::{AgentClient, ControlPlaneClient};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{Config, LogFormat};
use crate::repository::{HttpLeaseClient, HttpReportClient};
use crate::scheduler::JobLoop;
use crate::service::{ActionExecutor, Reporter, ToolchainStageRunner};
use crate::toolchain::Toolchain;

#[tokio::main]
async fn main() -> Result<()> {
    // Flushes buffered file output when main returns
    let _log_guard = init_tracing();

    info!("Starting Keel Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, control_plane_url={}, lease={:?}, poll={:?}, log_format={:?}, log_dir={:?}",
        config.runner_id,
        config.control_plane_url,
        config.lease_duration,
        config.poll_interval,
        config.log_format,
        config.log_dir
    );

    let control_plane = Arc::new(
        ControlPlaneClient::with_timeout(config.control_plane_url.clone(), config.request_timeout)
            .context("Failed to build control-plane client")?,
    );
    info!("Control-plane client initialized");

    let lease_client = Arc::new(HttpLeaseClient::new(
        Arc::clone(&control_plane),
        config.runner_id.clone(),
        config.lease_duration,
    ));
    let report_client = Arc::new(HttpReportClient::new(
        Arc::clone(&control_plane),
        config.runner_id.clone(),
    ));

    let toolchain = Toolchain::new(&config);
    if let Err(e) = toolchain.check_available().await {
        // Prebuilt-image jobs still work without a local container CLI
        warn!("Container CLI check failed: {:#}", e);
    }

    let agent = AgentClient::new(config.agent_token.expose(), config.request_timeout)
        .context("Failed to build deployment-agent client")?;

    let stage_runner = Arc::new(ToolchainStageRunner::new(
        toolchain,
        agent,
        config.agent_retry_policy(),
        config.workdir.clone(),
        config.remove_local_image,
    ));

    let executor = ActionExecutor::new(
        stage_runner,
        config.stage_timeouts,
        config.registry.clone(),
    );
    let reporter = Reporter::new(report_client, config.report_retry_policy());
    let job_loop = JobLoop::new(&config, lease_client, executor, reporter);

    info!("Runner initialized successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    job_loop.run(shutdown_rx).await;

    info!("Runner shutdown complete");
    Ok(())
}

/// Installs the global subscriber
///
/// Reads `LOG_FORMAT` and the log directory directly so configuration
/// errors are logged in the requested format and place too. When a log
/// directory is set, output also goes to a daily rotated file written from
/// a background thread; the returned guard flushes it on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keel_runner=info,keel_client=info".into());

    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.trim().parse::<LogFormat>().ok())
        .unwrap_or(LogFormat::Text);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Text => fmt::layer().boxed(),
    });

    let mut guard = None;
    let mut file_error = None;
    if let Some(dir) = config::log_dir_from(|name| std::env::var(name).ok()) {
        match rolling_log_file(&dir) {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
                layers.push(match format {
                    LogFormat::Json => file_layer.json().boxed(),
                    LogFormat::Text => file_layer.boxed(),
                });
                guard = Some(worker);
            }
            Err(e) => file_error = Some(e),
        }
    }

    tracing_subscriber::registry().with(layers).with(filter).init();

    if let Some(e) = file_error {
        warn!("File logging disabled: {:#}", e);
    }
    guard
}

/// Daily rotated `keel-runner.<date>.log` files under `dir`
fn rolling_log_file(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("keel-runner")
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("Failed to open log directory {}", dir.display()))
}

/// Loads and validates configuration; any problem here is fatal
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_log_file_writes_under_dir() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let mut appender = rolling_log_file(dir.path()).unwrap();
        appender.write_all(b"claimed job j1\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("keel-runner."), "{:?}", names);
        assert!(names[0].ends_with(".log"), "{:?}", names);
    }

    #[test]
    fn test_rolling_log_file_rejects_unusable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        assert!(rolling_log_file(&blocker.join("logs")).is_err());
    }
}
