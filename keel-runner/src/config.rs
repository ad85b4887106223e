//! Runner configuration
//!
//! Defines every tunable of the runner: control-plane connection, lease and
//! polling cadence, stage timeouts, registry and toolchain settings.
//! Configuration is read once at startup from the environment and shared
//! immutably for the lifetime of the process.

use anyhow::Context;
use keel_core::domain::result::StageKind;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::backoff::RetryPolicy;

/// Attempts per deployment-agent call before the deploy stage fails
const AGENT_MAX_ATTEMPTS: u32 = 3;

/// A credential that never shows up in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}' (expected text or json)", other),
        }
    }
}

/// Per-stage time budgets, independent of the lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Workspace prep, git clone, registry login and image build
    pub build: Duration,
    pub push: Duration,
    pub deploy: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: StageKind) -> Duration {
        match stage {
            StageKind::Build => self.build,
            StageKind::Push => self.push,
            StageKind::Deploy => self.deploy,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(1800),
            push: Duration::from_secs(900),
            deploy: Duration::from_secs(30),
        }
    }
}

/// Image registry used for git builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry host; git builds are refused when unset
    pub registry: Option<String>,
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
}

impl RegistryConfig {
    /// Returns username/password when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.expose())),
            _ => None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry: None,
            namespace: "funai".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Control plane base URL (e.g., "http://127.0.0.1:7002")
    pub control_plane_url: String,

    /// Lease duration requested on claim and on each renewal
    pub lease_duration: Duration,

    /// Pause between two claim attempts
    pub poll_interval: Duration,

    /// Credential presented to deployment agents
    pub agent_token: Secret,

    /// Renew the lease while a job executes
    pub lease_renewal: bool,

    /// Bound on every control-plane request
    pub request_timeout: Duration,

    /// Report delivery budget
    pub report_max_attempts: u32,
    pub report_backoff: Duration,

    pub stage_timeouts: StageTimeouts,

    pub registry: RegistryConfig,

    /// Container CLI (docker or podman)
    pub docker_bin: String,

    /// Root directory for per-app build workspaces
    pub workdir: PathBuf,

    /// SSH identity and known-hosts file used for git clones
    pub git_ssh_key_path: Option<PathBuf>,
    pub git_known_hosts_path: Option<PathBuf>,

    /// Remove the local image after a successful push
    pub remove_local_image: bool,

    /// How long an in-flight cycle may keep running after a shutdown signal
    pub shutdown_grace: Duration,

    pub log_format: LogFormat,

    /// Directory for daily rotated log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, control_plane_url: String, agent_token: Secret) -> Self {
        Self {
            runner_id,
            control_plane_url,
            lease_duration: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
            agent_token,
            lease_renewal: true,
            request_timeout: Duration::from_secs(10),
            report_max_attempts: 5,
            report_backoff: Duration::from_millis(500),
            stage_timeouts: StageTimeouts::default(),
            registry: RegistryConfig::default(),
            docker_bin: "docker".to_string(),
            workdir: PathBuf::from("/tmp/keel-runner-workdir"),
            git_ssh_key_path: None,
            git_known_hosts_path: None,
            remove_local_image: true,
            shutdown_grace: Duration::from_secs(30),
            log_format: LogFormat::Text,
            log_dir: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNTIME_AGENT_TOKEN (required)
    /// - DEPLOY_BASE_URL (optional, default: http://127.0.0.1:7002)
    /// - RUNNER_ID (optional, default: runner-<random uuid>)
    /// - JOB_LEASE_SECONDS (optional, default: 30)
    /// - POLL_SECONDS (optional, fractional seconds, default: 3)
    /// - JOB_LEASE_RENEW (optional, default: true)
    /// - CLAIM_TIMEOUT_SECONDS (optional, default: 10)
    /// - REPORT_MAX_ATTEMPTS / REPORT_BACKOFF_MS (optional, default: 5 / 500)
    /// - BUILD_TIMEOUT_SECONDS / PUSH_TIMEOUT_SECONDS / DEPLOY_TIMEOUT_SECONDS
    /// - ACR_REGISTRY, ACR_NAMESPACE, ACR_USERNAME, ACR_PASSWORD
    /// - RUNNER_DOCKER_BIN, RUNNER_WORKDIR, RUNNER_REMOVE_LOCAL_IMAGE
    /// - GIT_SSH_KEY_PATH, GIT_KNOWN_HOSTS_PATH
    /// - SHUTDOWN_GRACE_SECONDS (optional, default: 30)
    /// - LOG_FORMAT (optional, text or json)
    /// - LOG_DIR, falling back to FUNAI_LOG_DIR (optional)
    ///
    /// Blank values are treated as unset.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let agent_token = var("RUNTIME_AGENT_TOKEN")
            .map(Secret::new)
            .ok_or_else(|| anyhow::anyhow!("RUNTIME_AGENT_TOKEN environment variable not set"))?;

        let runner_id =
            var("RUNNER_ID").unwrap_or_else(|| format!("runner-{}", uuid::Uuid::new_v4()));

        let control_plane_url =
            var("DEPLOY_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:7002".to_string());

        let mut config = Self::new(runner_id, control_plane_url, agent_token);

        if let Some(secs) = parse_var::<u64>(&var, "JOB_LEASE_SECONDS")? {
            config.lease_duration = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<f64>(&var, "POLL_SECONDS")? {
            config.poll_interval = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("POLL_SECONDS out of range: {}", secs))?;
        }

        if let Some(renew) = parse_bool(&var, "JOB_LEASE_RENEW")? {
            config.lease_renewal = renew;
        }

        if let Some(secs) = parse_var::<u64>(&var, "CLAIM_TIMEOUT_SECONDS")? {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(attempts) = parse_var::<u32>(&var, "REPORT_MAX_ATTEMPTS")? {
            config.report_max_attempts = attempts;
        }

        if let Some(ms) = parse_var::<u64>(&var, "REPORT_BACKOFF_MS")? {
            config.report_backoff = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var::<u64>(&var, "BUILD_TIMEOUT_SECONDS")? {
            config.stage_timeouts.build = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&var, "PUSH_TIMEOUT_SECONDS")? {
            config.stage_timeouts.push = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_var::<u64>(&var, "DEPLOY_TIMEOUT_SECONDS")? {
            config.stage_timeouts.deploy = Duration::from_secs(secs);
        }

        config.registry.registry = var("ACR_REGISTRY");
        if let Some(namespace) = var("ACR_NAMESPACE") {
            config.registry.namespace = namespace;
        }
        config.registry.username = var("ACR_USERNAME");
        config.registry.password = var("ACR_PASSWORD").map(Secret::new);

        if let Some(bin) = var("RUNNER_DOCKER_BIN") {
            config.docker_bin = bin;
        }

        if let Some(dir) = var("RUNNER_WORKDIR") {
            config.workdir = PathBuf::from(dir);
        }

        config.git_ssh_key_path = var("GIT_SSH_KEY_PATH").map(PathBuf::from);
        config.git_known_hosts_path = var("GIT_KNOWN_HOSTS_PATH").map(PathBuf::from);

        if let Some(remove) = parse_bool(&var, "RUNNER_REMOVE_LOCAL_IMAGE")? {
            config.remove_local_image = remove;
        }

        if let Some(secs) = parse_var::<u64>(&var, "SHUTDOWN_GRACE_SECONDS")? {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        if let Some(format) = var("LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        config.log_dir = log_dir_from(&lookup);

        Ok(config)
    }

    /// Retry policy for report delivery
    pub fn report_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.report_max_attempts, self.report_backoff)
    }

    /// Retry policy for deployment-agent calls inside the deploy stage
    pub fn agent_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(AGENT_MAX_ATTEMPTS, self.report_backoff)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.control_plane_url.is_empty() {
            anyhow::bail!("control_plane_url cannot be empty");
        }

        if !self.control_plane_url.starts_with("http://")
            && !self.control_plane_url.starts_with("https://")
        {
            anyhow::bail!("control_plane_url must start with http:// or https://");
        }

        if self.agent_token.expose().is_empty() {
            anyhow::bail!("agent_token cannot be empty");
        }

        if self.lease_duration.as_secs() == 0 {
            anyhow::bail!("lease_duration must be at least one second");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.report_max_attempts == 0 {
            anyhow::bail!("report_max_attempts must be greater than 0");
        }

        for stage in [StageKind::Build, StageKind::Push, StageKind::Deploy] {
            if self.stage_timeouts.for_stage(stage).is_zero() {
                anyhow::bail!("{} timeout must be greater than 0", stage);
            }
        }

        if self.docker_bin.is_empty() {
            anyhow::bail!("docker_bin cannot be empty");
        }

        Ok(())
    }
}

/// Log directory from `LOG_DIR`, falling back to `FUNAI_LOG_DIR`
///
/// Read on its own as well so logging can start before the rest of the
/// configuration is loaded.
pub fn log_dir_from(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    ["LOG_DIR", "FUNAI_LOG_DIR"]
        .into_iter()
        .filter_map(|name| lookup(name))
        .map(|dir| dir.trim().to_string())
        .find(|dir| !dir.is_empty())
        .map(PathBuf::from)
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{} has an invalid value: '{}'", name, raw))
        })
        .transpose()
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<bool>> {
    var(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("{} has an invalid value: '{}'", name, raw),
        })
        .transpose()
}
