//! Deployment client.
//!
//! Starts an image build, waits for it, then waits until the tool endpoint
//! runs the newest image in the repository. Agent provisioning happens on
//! the event path; the client only watches the endpoint and never calls the
//! agent-management API.
//!
//! `success` means the endpoint runs the new image. It does not mean the
//! agent for that image has reached `Ready`; check its deployment record.

use std::fmt;
use std::sync::Arc;

use autodeploy_state::ArtifactRef;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::backends::{
    newest_artifact, BuildId, BuildRunner, BuildStatus, ImageRegistry, ProviderErrorKind,
    ToolEndpoint,
};
use crate::config::DeployConfig;
use crate::domain::DeployError;
use crate::obs;
use crate::retry::{poll_until, retry_transient, PollError, PollStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployOutcome {
    Success,
    BuildFailed,
    TimeoutWaitingForDeploy,
}

impl DeployOutcome {
    pub fn is_success(self) -> bool {
        self == DeployOutcome::Success
    }
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployOutcome::Success => "success",
            DeployOutcome::BuildFailed => "build-failed",
            DeployOutcome::TimeoutWaitingForDeploy => "timeout-waiting-for-deploy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    StartBuild,
    WaitBuild,
    ResolveArtifact,
    WaitEndpoint,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::StartBuild => "start_build",
            Phase::WaitBuild => "wait_build",
            Phase::ResolveArtifact => "resolve_artifact",
            Phase::WaitEndpoint => "wait_endpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: u64,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub outcome: DeployOutcome,
    /// Phase the run ended in.
    pub last_phase: Phase,
    pub phases: Vec<PhaseTiming>,
    pub build_id: Option<BuildId>,
    pub artifact: Option<ArtifactRef>,
    pub message: Option<String>,
}

/// Accumulates phase timings while the client runs.
struct Progress {
    phases: Vec<PhaseTiming>,
    build_id: Option<BuildId>,
    artifact: Option<ArtifactRef>,
}

impl Progress {
    fn finish_phase(&mut self, phase: Phase, started: Instant, ok: bool) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        obs::emit_client_phase(phase.as_str(), elapsed_ms, ok);
        self.phases.push(PhaseTiming {
            phase,
            elapsed_ms,
            ok,
        });
    }

    fn report(
        self,
        outcome: DeployOutcome,
        last_phase: Phase,
        message: Option<String>,
    ) -> DeployReport {
        DeployReport {
            outcome,
            last_phase,
            phases: self.phases,
            build_id: self.build_id,
            artifact: self.artifact,
            message,
        }
    }
}

pub struct DeploymentClient {
    config: DeployConfig,
    builds: Arc<dyn BuildRunner>,
    registry: Arc<dyn ImageRegistry>,
    endpoint: Arc<dyn ToolEndpoint>,
}

impl DeploymentClient {
    pub fn new(
        config: DeployConfig,
        builds: Arc<dyn BuildRunner>,
        registry: Arc<dyn ImageRegistry>,
        endpoint: Arc<dyn ToolEndpoint>,
    ) -> Self {
        Self {
            config,
            builds,
            registry,
            endpoint,
        }
    }

    /// Run one build-and-wait cycle.
    ///
    /// Build and endpoint problems are reported through
    /// [`DeployReport::outcome`]. `Err` means the registry could not tell us
    /// which image the build produced.
    pub async fn run(&self) -> Result<DeployReport, DeployError> {
        let mut progress = Progress {
            phases: Vec::new(),
            build_id: None,
            artifact: None,
        };

        // start_build
        let started = Instant::now();
        let build_id = match self.builds.start_build().await {
            Ok(id) => id,
            Err(err) => {
                progress.finish_phase(Phase::StartBuild, started, false);
                return Ok(progress.report(
                    DeployOutcome::BuildFailed,
                    Phase::StartBuild,
                    Some(format!("could not start build: {}", err)),
                ));
            }
        };
        info!(build_id = %build_id, project = %self.config.build_project, "build started");
        progress.build_id = Some(build_id.clone());
        progress.finish_phase(Phase::StartBuild, started, true);

        // wait_build
        let started = Instant::now();
        let builds = self.builds.as_ref();
        let waited = poll_until(&self.config.policies.build, "build", || {
            let id = build_id.clone();
            async move {
                Ok(match builds.build_status(&id).await? {
                    BuildStatus::InProgress => PollStatus::Pending("in_progress".to_string()),
                    done => PollStatus::Done(done),
                })
            }
        })
        .await;
        match waited {
            Ok(BuildStatus::Succeeded) => progress.finish_phase(Phase::WaitBuild, started, true),
            Ok(status) => {
                progress.finish_phase(Phase::WaitBuild, started, false);
                let reason = match status {
                    BuildStatus::Failed(reason) => reason,
                    other => format!("{:?}", other),
                };
                return Ok(progress.report(
                    DeployOutcome::BuildFailed,
                    Phase::WaitBuild,
                    Some(format!("build {} failed: {}", build_id, reason)),
                ));
            }
            Err(PollError::TimedOut { waited_ms, .. }) => {
                progress.finish_phase(Phase::WaitBuild, started, false);
                return Ok(progress.report(
                    DeployOutcome::TimeoutWaitingForDeploy,
                    Phase::WaitBuild,
                    Some(format!("build {} still running after {}ms", build_id, waited_ms)),
                ));
            }
            Err(PollError::Fatal(err)) => {
                progress.finish_phase(Phase::WaitBuild, started, false);
                return Ok(progress.report(
                    DeployOutcome::BuildFailed,
                    Phase::WaitBuild,
                    Some(format!("build status unavailable: {}", err)),
                ));
            }
        }

        // resolve_artifact
        let started = Instant::now();
        let artifact = match self.resolve_artifact().await {
            Ok(artifact) => artifact,
            Err(err) => {
                progress.finish_phase(Phase::ResolveArtifact, started, false);
                return Err(err);
            }
        };
        info!(digest = %artifact.digest, "waiting for endpoint to run new image");
        progress.artifact = Some(artifact.clone());
        progress.finish_phase(Phase::ResolveArtifact, started, true);

        // wait_endpoint
        let started = Instant::now();
        let endpoint = self.endpoint.as_ref();
        let expected = &artifact.digest;
        let policy = &self.config.policies.endpoint_reflect;
        let reflected = poll_until(policy, "endpoint image", || async move {
            Ok(match endpoint.current_image().await? {
                Some(current) if &current.digest == expected => PollStatus::Done(()),
                Some(current) => {
                    PollStatus::Pending(format!("running {}", current.digest.short()))
                }
                None => PollStatus::Pending("no digest-pinned image".to_string()),
            })
        })
        .await;

        match reflected {
            Ok(()) => {
                progress.finish_phase(Phase::WaitEndpoint, started, true);
                Ok(progress.report(DeployOutcome::Success, Phase::WaitEndpoint, None))
            }
            Err(PollError::TimedOut {
                waited_ms,
                last_status,
                ..
            }) => {
                progress.finish_phase(Phase::WaitEndpoint, started, false);
                let last = last_status.unwrap_or_else(|| "unavailable".to_string());
                Ok(progress.report(
                    DeployOutcome::TimeoutWaitingForDeploy,
                    Phase::WaitEndpoint,
                    Some(format!(
                        "endpoint not running {} after {}ms (last: {})",
                        artifact.digest, waited_ms, last
                    )),
                ))
            }
            Err(PollError::Fatal(err)) => {
                progress.finish_phase(Phase::WaitEndpoint, started, false);
                Ok(progress.report(
                    DeployOutcome::TimeoutWaitingForDeploy,
                    Phase::WaitEndpoint,
                    Some(format!("endpoint check failed: {}", err)),
                ))
            }
        }
    }

    async fn resolve_artifact(&self) -> Result<ArtifactRef, DeployError> {
        let repository = self.config.repository.as_str();
        let images = retry_transient(&self.config.policies.registry, "registry lookup", || {
            self.registry.list_images(repository)
        })
        .await
        .map_err(|err| match err.kind {
            ProviderErrorKind::NotFound => {
                obs::emit_artifact_not_found(repository);
                DeployError::ArtifactNotFound {
                    repository: repository.to_string(),
                }
            }
            _ => DeployError::Registry(err.to_string()),
        })?;
        newest_artifact(images).ok_or_else(|| {
            obs::emit_artifact_not_found(repository);
            DeployError::ArtifactNotFound {
                repository: repository.to_string(),
            }
        })
    }
}
