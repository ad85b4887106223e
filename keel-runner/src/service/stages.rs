//! Stage runner
//!
//! The capability the executor drives: run one stage and say how it went.
//! The production implementation shells out to git/docker for build and push
//! and calls the deployment agent for deploy. Tests substitute fakes.

use async_trait::async_trait;
use keel_client::AgentClient;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::backoff::{self, RetryPolicy};
use crate::service::plan::{BuildStage, DeployStage, PushStage, Stage};
use crate::toolchain::{Toolchain, Workspace};

/// How a single stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage did its job; `artifact` names what it produced, if anything
    Succeeded { artifact: Option<String> },
    /// Stage failed; `diagnostic` explains why (exit code, rejection, ...)
    Failed { diagnostic: String },
}

impl StageOutcome {
    pub fn succeeded() -> Self {
        StageOutcome::Succeeded { artifact: None }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        StageOutcome::Failed {
            diagnostic: diagnostic.into(),
        }
    }
}

/// Capability for running stages
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Runs one stage to completion
    ///
    /// Implementations must release any external resource they hold when the
    /// returned future is dropped; the executor drops it on lease expiry and
    /// on stage timeout.
    async fn run(&self, stage: &Stage) -> StageOutcome;
}

/// Stage runner backed by the local toolchain and a deployment agent
pub struct ToolchainStageRunner {
    toolchain: Toolchain,
    agent: AgentClient,
    agent_retry: RetryPolicy,
    workdir: PathBuf,
    remove_local_image: bool,
}

impl ToolchainStageRunner {
    pub fn new(
        toolchain: Toolchain,
        agent: AgentClient,
        agent_retry: RetryPolicy,
        workdir: PathBuf,
        remove_local_image: bool,
    ) -> Self {
        Self {
            toolchain,
            agent,
            agent_retry,
            workdir,
            remove_local_image,
        }
    }

    async fn build(&self, stage: &BuildStage) -> StageOutcome {
        let dir = self.workdir.join(format!("app-{}", stage.app_id));
        let workspace = match Workspace::prepare(dir).await {
            Ok(workspace) => workspace,
            Err(e) => return StageOutcome::failed(format!("failed to prepare workspace: {}", e)),
        };

        info!(
            "Cloning {} at {} into {}",
            stage.repo_ssh_url,
            stage.git_ref,
            workspace.path().display()
        );
        if let Err(e) = self
            .toolchain
            .git_clone(&stage.repo_ssh_url, &stage.git_ref, workspace.path())
            .await
        {
            return StageOutcome::failed(e.to_string());
        }

        if let Err(e) = self.toolchain.login().await {
            return StageOutcome::failed(e.to_string());
        }

        info!("Building image {}", stage.image);
        match self.toolchain.build_image(&stage.image, workspace.path()).await {
            Ok(()) => StageOutcome::Succeeded {
                artifact: Some(stage.image.clone()),
            },
            Err(e) => StageOutcome::failed(e.to_string()),
        }
    }

    async fn push(&self, stage: &PushStage) -> StageOutcome {
        if let Err(e) = self.toolchain.login().await {
            return StageOutcome::failed(e.to_string());
        }

        info!("Pushing image {}", stage.image);
        if let Err(e) = self.toolchain.push_image(&stage.image).await {
            return StageOutcome::failed(e.to_string());
        }

        if self.remove_local_image {
            self.toolchain.remove_image(&stage.image).await;
        }

        StageOutcome::succeeded()
    }

    async fn deploy(&self, stage: &DeployStage) -> StageOutcome {
        info!(
            "Deploying app {} ({}) via {}",
            stage.request.app_id, stage.request.image, stage.agent_base_url
        );

        let (result, attempts) = backoff::retry(&self.agent_retry, "deploy agent call", || {
            self.agent.deploy_app(&stage.agent_base_url, &stage.request)
        })
        .await;

        match result {
            Ok(_) => StageOutcome::succeeded(),
            Err(e) => {
                warn!(
                    "Deploy agent rejected app {} after {} attempt(s): {}",
                    stage.request.app_id, attempts, e
                );
                StageOutcome::failed(format!("agent rejected deployment: {}", e))
            }
        }
    }
}

#[async_trait]
impl StageRunner for ToolchainStageRunner {
    async fn run(&self, stage: &Stage) -> StageOutcome {
        match stage {
            Stage::Build(build) => self.build(build).await,
            Stage::Push(push) => self.push(push).await,
            Stage::Deploy(deploy) => self.deploy(deploy).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Secret};
    use keel_core::dto::agent::DeployAppRequest;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runner(workdir: PathBuf) -> ToolchainStageRunner {
        let mut config = Config::new(
            "runner-01".to_string(),
            "http://127.0.0.1:7002".to_string(),
            Secret::new("t0k"),
        );
        config.docker_bin = "/nonexistent/docker".to_string();
        ToolchainStageRunner::new(
            Toolchain::new(&config),
            AgentClient::new("t0k", Duration::from_secs(5)).unwrap(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            workdir,
            true,
        )
    }

    fn deploy_stage(agent_base_url: String) -> Stage {
        Stage::Deploy(DeployStage {
            agent_base_url,
            request: DeployAppRequest::new("42", "registry/app:1", 3000, None),
        })
    }

    #[tokio::test]
    async fn test_deploy_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/apps/deploy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let workdir = tempfile::tempdir().unwrap();
        let outcome = runner(workdir.path().to_path_buf())
            .run(&deploy_stage(server.uri()))
            .await;
        assert_eq!(outcome, StageOutcome::succeeded());
    }

    #[tokio::test]
    async fn test_deploy_retries_transient_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/apps/deploy"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let workdir = tempfile::tempdir().unwrap();
        let outcome = runner(workdir.path().to_path_buf())
            .run(&deploy_stage(server.uri()))
            .await;
        match outcome {
            StageOutcome::Failed { diagnostic } => {
                assert!(diagnostic.starts_with("agent rejected deployment"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deploy_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/apps/deploy"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let workdir = tempfile::tempdir().unwrap();
        let outcome = runner(workdir.path().to_path_buf())
            .run(&deploy_stage(server.uri()))
            .await;
        assert!(matches!(outcome, StageOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_build_without_ssh_config_fails_and_cleans_up() {
        let workdir = tempfile::tempdir().unwrap();
        let stage = Stage::Build(BuildStage {
            app_id: "42".to_string(),
            repo_ssh_url: "git@git.example.com:u7/app42.git".to_string(),
            git_ref: "main".to_string(),
            image: "registry/app:1".to_string(),
        });

        let outcome = runner(workdir.path().to_path_buf()).run(&stage).await;
        match outcome {
            StageOutcome::Failed { diagnostic } => assert!(diagnostic.contains("GIT_SSH_KEY_PATH")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!workdir.path().join("app-42").exists());
    }

    #[tokio::test]
    async fn test_push_with_missing_cli_fails() {
        let workdir = tempfile::tempdir().unwrap();
        let stage = Stage::Push(PushStage {
            image: "registry/app:1".to_string(),
        });

        let outcome = runner(workdir.path().to_path_buf()).run(&stage).await;
        match outcome {
            StageOutcome::Failed { diagnostic } => {
                assert!(diagnostic.contains("failed to start"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
