//! Deployment planning
//!
//! Turns a claimed job into the fixed, ordered list of stages to run. All
//! validation happens here, before any side effect: a job that would fail
//! half-way for lack of a field is rejected up front.

use keel_core::domain::job::Job;
use keel_core::domain::result::StageKind;
use keel_core::dto::agent::DeployAppRequest;
use thiserror::Error;

use crate::config::RegistryConfig;

/// Reasons a job spec cannot be executed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("malformed {0}")]
    Malformed(String),

    #[error("missing appId")]
    MissingAppId,

    #[error("missing runtimeNode.agentBaseUrl")]
    MissingAgent,

    #[error("missing repoSshUrl (required when payload.image is not provided)")]
    MissingRepository,

    #[error("no registry configured (required when payload.image is not provided)")]
    MissingRegistry,
}

/// Clone the repository and build the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStage {
    pub app_id: String,
    pub repo_ssh_url: String,
    pub git_ref: String,
    pub image: String,
}

/// Push the built image to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushStage {
    pub image: String,
}

/// Ask the deployment agent to run the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStage {
    pub agent_base_url: String,
    pub request: DeployAppRequest,
}

/// One step of a deployment plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Build(BuildStage),
    Push(PushStage),
    Deploy(DeployStage),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Build(_) => StageKind::Build,
            Stage::Push(_) => StageKind::Push,
            Stage::Deploy(_) => StageKind::Deploy,
        }
    }
}

/// Validated form of a job spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    /// Image the plan deploys (prebuilt, or the one the build stage produces)
    pub image: String,
    /// Stages in execution order: build → push → deploy
    pub stages: Vec<Stage>,
}

impl DeploymentPlan {
    pub fn from_job(job: &Job, registry: &RegistryConfig) -> Result<Self, SpecError> {
        if let Some(reason) = &job.spec_error {
            return Err(SpecError::Malformed(reason.clone()));
        }
        let spec = &job.spec;

        let app_id = spec
            .app_id
            .clone()
            .ok_or(SpecError::MissingAppId)?;
        let agent_base_url = job
            .agent_base_url()
            .ok_or(SpecError::MissingAgent)?
            .to_string();

        let mut stages = Vec::with_capacity(3);

        let image = match spec.prebuilt_image() {
            Some(image) => image.to_string(),
            None => {
                let repo_ssh_url = spec
                    .repo_ssh_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .ok_or(SpecError::MissingRepository)?
                    .to_string();
                let registry_host = registry
                    .registry
                    .as_deref()
                    .ok_or(SpecError::MissingRegistry)?;

                let image = image_reference(
                    registry_host,
                    &registry.namespace,
                    spec.user_id.as_deref(),
                    &app_id,
                    spec.image_tag(),
                );

                stages.push(Stage::Build(BuildStage {
                    app_id: app_id.clone(),
                    repo_ssh_url,
                    git_ref: spec.git_ref().to_string(),
                    image: image.clone(),
                }));
                stages.push(Stage::Push(PushStage {
                    image: image.clone(),
                }));
                image
            }
        };

        stages.push(Stage::Deploy(DeployStage {
            agent_base_url,
            request: DeployAppRequest::new(
                app_id,
                image.clone(),
                spec.container_port(),
                spec.base_path(),
            ),
        }));

        Ok(Self { image, stages })
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }
}

/// `{registry}/{namespace}/u{user}-app{app}:{tag}`; the user prefix is
/// dropped when the job carries no user id
fn image_reference(
    registry: &str,
    namespace: &str,
    user_id: Option<&str>,
    app_id: &str,
    tag: &str,
) -> String {
    let registry = registry.trim_end_matches('/');
    let namespace = namespace.trim_matches('/');
    let name = match user_id {
        Some(user) => format!("u{}-app{}", user, app_id),
        None => format!("app{}", app_id),
    };

    if namespace.is_empty() {
        format!("{}/{}:{}", registry, name, tag)
    } else {
        format!("{}/{}/{}:{}", registry, namespace, name, tag)
    }
}
