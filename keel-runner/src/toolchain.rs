//! Local build tooling
//!
//! Wraps the external programs the build and push stages shell out to:
//! - Checking the container CLI is available
//! - Cloning the application repository over SSH
//! - Logging in to the registry, building, pushing and removing images
//!
//! Every child process is spawned with kill-on-drop, so abandoning a stage
//! (lease expiry, stage timeout, shutdown) also stops the process it started.
//! [`Workspace`] removes the build directory on every exit path.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, RegistryConfig};

/// Bytes of combined output kept in a failure diagnostic
const OUTPUT_TAIL_BYTES: usize = 2000;

/// Why an external command did not succeed
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exit {code}: {output}")]
    Exit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("{0}")]
    Misconfigured(String),
}

/// Build/push toolchain configured for this runner
#[derive(Debug, Clone)]
pub struct Toolchain {
    docker_bin: String,
    registry: RegistryConfig,
    git_ssh_key_path: Option<PathBuf>,
    git_known_hosts_path: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(config: &Config) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            registry: config.registry.clone(),
            git_ssh_key_path: config.git_ssh_key_path.clone(),
            git_known_hosts_path: config.git_known_hosts_path.clone(),
        }
    }

    /// Checks that the container CLI is installed and answering
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.docker_bin)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| {
                format!(
                    "Failed to execute '{} --version'. Is it installed?",
                    self.docker_bin
                )
            })?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", self.docker_bin);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("{} is available: {}", self.docker_bin, version.trim());

        Ok(())
    }

    /// `GIT_SSH_COMMAND` pinning the configured identity and known hosts
    fn git_ssh_command(&self) -> Result<String, CommandError> {
        match (&self.git_ssh_key_path, &self.git_known_hosts_path) {
            (Some(key), Some(known_hosts)) => Ok(format!(
                "ssh -i {} -o UserKnownHostsFile={} -o StrictHostKeyChecking=yes",
                key.display(),
                known_hosts.display()
            )),
            _ => Err(CommandError::Misconfigured(
                "GIT_SSH_KEY_PATH / GIT_KNOWN_HOSTS_PATH not configured".to_string(),
            )),
        }
    }

    /// Clones `repo` at `git_ref` into `dest`
    ///
    /// Tries a shallow clone of the ref first (works for branches and tags);
    /// falls back to a full clone plus checkout for commit SHAs.
    pub async fn git_clone(&self, repo: &str, git_ref: &str, dest: &Path) -> Result<(), CommandError> {
        let ssh_command = self.git_ssh_command()?;

        let mut shallow = Command::new("git");
        shallow
            .args(["clone", "--depth", "1", "--branch", git_ref, repo])
            .arg(dest)
            .env("GIT_SSH_COMMAND", &ssh_command);

        match run(&mut shallow, "git clone", None).await {
            Ok(_) => return Ok(()),
            Err(e) => debug!("Shallow clone of {} at {} failed, retrying full clone: {}", repo, git_ref, e),
        }

        reset_dir(dest)
            .await
            .map_err(|source| CommandError::Spawn {
                program: "git".to_string(),
                source,
            })?;

        let mut full = Command::new("git");
        full.args(["clone", repo])
            .arg(dest)
            .env("GIT_SSH_COMMAND", &ssh_command);
        run(&mut full, "git clone", None).await?;

        let mut checkout = Command::new("git");
        checkout
            .args(["checkout", git_ref])
            .current_dir(dest)
            .env("GIT_SSH_COMMAND", &ssh_command);
        run(&mut checkout, "git checkout", None).await?;

        Ok(())
    }

    /// Logs in to the registry when credentials are configured
    ///
    /// Without credentials the machine is assumed to be logged in already.
    /// The password goes through stdin, never argv.
    pub async fn login(&self) -> Result<(), CommandError> {
        let (Some(registry), Some((user, password))) =
            (self.registry.registry.as_deref(), self.registry.credentials())
        else {
            return Ok(());
        };

        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["login", registry, "-u", user, "--password-stdin"]);
        run(&mut cmd, "registry login", Some(&format!("{}\n", password))).await?;

        debug!("Logged in to registry {} as {}", registry, user);
        Ok(())
    }

    /// Builds `image` from `context_dir`, passing registry settings as build args
    pub async fn build_image(&self, image: &str, context_dir: &Path) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["build", "-t", image]);

        if let Some(registry) = self.registry.registry.as_deref() {
            cmd.arg("--build-arg").arg(format!("REGISTRY={}", registry));
        }
        cmd.arg("--build-arg")
            .arg(format!("REGISTRY_NAMESPACE={}", self.registry.namespace));

        cmd.arg(context_dir).current_dir(context_dir);
        run(&mut cmd, "docker build", None).await?;
        Ok(())
    }

    pub async fn push_image(&self, image: &str) -> Result<(), CommandError> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["push", image]);
        run(&mut cmd, "docker push", None).await?;
        Ok(())
    }

    /// Removes the local copy of `image`; failures are only logged
    pub async fn remove_image(&self, image: &str) {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["rmi", "-f", image]);

        match run(&mut cmd, "docker rmi", None).await {
            Ok(_) => info!("Local image removed: {}", image),
            Err(e) => warn!("Failed to remove local image {}: {}", image, e),
        }
    }
}

/// Runs a command to completion, capturing combined output
///
/// `label` names the command in diagnostics; arguments are never echoed
/// since they may carry credentials.
async fn run(cmd: &mut Command, label: &str, stdin: Option<&str>) -> Result<String, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    cmd.kill_on_drop(true)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let spawn_error = |source| CommandError::Spawn {
        program: program.clone(),
        source,
    };

    let mut child = cmd.spawn().map_err(spawn_error)?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        match pipe.write_all(input.as_bytes()).await {
            Ok(()) => {}
            // The child quit without reading; its exit status tells why
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("{} closed stdin before reading it", label);
            }
            Err(e) => return Err(spawn_error(e)),
        }
        // Dropping the pipe closes stdin
    }

    let output = child.wait_with_output().await.map_err(spawn_error)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        debug!("{} failed: exit_code={} output='{}'", label, code, combined.trim());
        return Err(CommandError::Exit {
            command: label.to_string(),
            code,
            output: tail(combined.trim(), OUTPUT_TAIL_BYTES).to_string(),
        });
    }

    debug!("{} completed: output_len={}", label, combined.len());
    Ok(combined)
}

/// Last `max` bytes of `text`, cut on a char boundary
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

async fn reset_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(path).await
}

/// Build directory for one job, removed when dropped
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Creates (or empties) the directory at `path`
    pub async fn prepare(path: PathBuf) -> std::io::Result<Self> {
        reset_dir(&path).await?;
        debug!("Prepared workspace {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        // Removal is blocking I/O; keep it off the async worker threads
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || remove_workspace(&path));
            }
            Err(_) => remove_workspace(&path),
        }
    }
}

fn remove_workspace(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn toolchain(docker_bin: &str) -> Toolchain {
        let mut config = Config::new(
            "runner-01".to_string(),
            "http://127.0.0.1:7002".to_string(),
            Secret::new("t0k"),
        );
        config.docker_bin = docker_bin.to_string();
        Toolchain::new(&config)
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        // 'é' is two bytes; cutting inside it moves forward
        assert_eq!(tail("aéb", 2), "b");
    }

    #[test]
    fn test_git_ssh_command_requires_paths() {
        let mut tc = toolchain("docker");
        assert!(matches!(tc.git_ssh_command(), Err(CommandError::Misconfigured(_))));

        tc.git_ssh_key_path = Some(PathBuf::from("/keys/id"));
        tc.git_known_hosts_path = Some(PathBuf::from("/keys/known_hosts"));
        assert_eq!(
            tc.git_ssh_command().unwrap(),
            "ssh -i /keys/id -o UserKnownHostsFile=/keys/known_hosts -o StrictHostKeyChecking=yes"
        );
    }

    #[tokio::test]
    async fn test_login_without_credentials_is_noop() {
        // Would fail to spawn if it tried to run anything
        let tc = toolchain("/nonexistent/docker");
        assert!(tc.login().await.is_ok());
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        match run(&mut cmd, "sh", None).await {
            Err(CommandError::Exit { code, output, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(output, "boom");
            }
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_feeds_stdin() {
        let mut cmd = Command::new("cat");
        let output = run(&mut cmd, "cat", Some("secret\n")).await.unwrap();
        assert_eq!(output, "secret\n");
    }

    #[tokio::test]
    async fn test_run_child_ignoring_stdin_reports_exit() {
        // More input than a pipe buffers, to a child that closes stdin and quits
        let input = "x".repeat(1 << 20);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec 0<&-; echo no login >&2; exit 4"]);
        match run(&mut cmd, "login", Some(input.as_str())).await {
            Err(CommandError::Exit { code, output, .. }) => {
                assert_eq!(code, 4);
                assert_eq!(output, "no login");
            }
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let mut cmd = Command::new("/nonexistent/program");
        assert!(matches!(
            run(&mut cmd, "missing", None).await,
            Err(CommandError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("app-42");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("stale.txt"), "old").unwrap();

        let workspace = Workspace::prepare(path.clone()).await.unwrap();
        assert!(workspace.path().exists());
        assert!(!workspace.path().join("stale.txt").exists());

        drop(workspace);
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while path.exists() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workspace was not removed");
    }

    #[test]
    fn test_workspace_removed_on_drop_outside_runtime() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("app-43");
        std::fs::create_dir_all(path.join("src")).unwrap();

        drop(Workspace { path: path.clone() });
        assert!(!path.exists());
    }
}
