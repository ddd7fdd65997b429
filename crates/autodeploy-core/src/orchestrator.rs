//! Deployment orchestrator.
//!
//! Handles one publish event per call:
//!
//! 1. drop events that do not qualify (no calls, no record)
//! 2. resolve the newest artifact in the repository
//! 3. record the deployment and point the tool endpoint at the artifact
//! 4. drive the provisioning machine, persisting after every transition
//!
//! The endpoint update always completes before the first agent call, so a
//! new agent never invokes an endpoint still running an older image.

use std::sync::Arc;

use autodeploy_state::{
    ArtifactRef, DeploymentRecord, DeploymentState, DeploymentStore, EndpointLedger,
    EndpointRecord, EndpointRef,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::backends::{
    newest_artifact, ActionGroupSpec, AgentApi, AgentDraft, EndpointStatus, ImageRegistry,
    ProviderError, ProviderErrorKind, ToolEndpoint,
};
use crate::config::DeployConfig;
use crate::domain::{
    agent_name, derive_version, Clock, DeployError, PublishEvent, SkipReason, SystemClock,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::provisioning::ProvisioningMachine;
use crate::retry::{poll_until, retry_transient, PollError, PollStatus};

/// Transition name recorded when the endpoint step fails.
pub const UPDATE_ENDPOINT: &str = "update_endpoint";

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleOutcome {
    /// Event did not qualify; nothing was called or recorded.
    Ignored { reason: SkipReason },
    /// Record reached `Ready`.
    Deployed { record: DeploymentRecord },
    /// Record reached `Failed`.
    Failed { record: DeploymentRecord },
}

impl HandleOutcome {
    pub fn record(&self) -> Option<&DeploymentRecord> {
        match self {
            HandleOutcome::Ignored { .. } => None,
            HandleOutcome::Deployed { record } | HandleOutcome::Failed { record } => Some(record),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, HandleOutcome::Failed { .. })
    }
}

pub struct Orchestrator {
    config: DeployConfig,
    registry: Arc<dyn ImageRegistry>,
    endpoint: Arc<dyn ToolEndpoint>,
    agents: Arc<dyn AgentApi>,
    store: Arc<dyn DeploymentStore>,
    ledger: Arc<dyn EndpointLedger>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        config: DeployConfig,
        registry: Arc<dyn ImageRegistry>,
        endpoint: Arc<dyn ToolEndpoint>,
        agents: Arc<dyn AgentApi>,
        store: Arc<dyn DeploymentStore>,
        ledger: Arc<dyn EndpointLedger>,
    ) -> Self {
        Self {
            config,
            registry,
            endpoint,
            agents,
            store,
            ledger,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Handle one publish event.
    ///
    /// Returns `Err` only when no record could be written (no artifact,
    /// registry or storage trouble). Deployment failures after the record
    /// exists come back as [`HandleOutcome::Failed`].
    pub async fn handle(&self, event: &PublishEvent) -> Result<HandleOutcome, DeployError> {
        METRICS.inc_events_received();

        if let Err(reason) = event.qualifies(&self.config.repository) {
            METRICS.inc_events_ignored();
            obs::emit_event_ignored(event.repository(), &reason);
            return Ok(HandleOutcome::Ignored { reason });
        }

        let artifact = self.resolve_artifact().await?;
        let version = derive_version(self.config.label_source, &artifact, self.clock.as_ref());
        let name = agent_name(&self.config.agent_name_prefix, &version);

        let record = DeploymentRecord::new(version, name, artifact, self.clock.now());
        self.store.insert(&record).await?;
        obs::emit_deploy_started(
            &record.deployment_id.0,
            &record.agent_name,
            record.artifact.digest.as_str(),
        );

        let span = obs::deployment_span(&record.deployment_id.0, &record.agent_name);
        self.run(record).instrument(span).await
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

        debug!(repository, images = images.len(), "registry listing");
        newest_artifact(images).ok_or_else(|| {
            obs::emit_artifact_not_found(repository);
            DeployError::ArtifactNotFound {
                repository: repository.to_string(),
            }
        })
    }

    async fn run(&self, mut record: DeploymentRecord) -> Result<HandleOutcome, DeployError> {
        let started = Instant::now();

        let reference = match self.update_endpoint(&record.artifact).await {
            Ok(reference) => reference,
            Err(err) => return self.finish_failed(record, UPDATE_ENDPOINT, err, started).await,
        };

        let applied_at = self.clock.now();
        self.ledger
            .record_applied(&EndpointRecord {
                endpoint: reference.clone(),
                deployment_id: record.deployment_id.clone(),
                applied_at,
            })
            .await?;
        METRICS.inc_endpoint_updates();

        record.endpoint = Some(reference.clone());
        self.persist_transition(&mut record, UPDATE_ENDPOINT, DeploymentState::EndpointUpdated)
            .await?;

        let draft = AgentDraft {
            name: record.agent_name.clone(),
            foundation_model: self.config.foundation_model.clone(),
            instruction: self.config.instruction.clone(),
            role_arn: self.config.agent_role_arn.clone(),
        };
        let action_group = ActionGroupSpec {
            name: self.config.action_group_name.clone(),
            executor_target: reference.target,
            schema: self.config.tools.clone(),
        };
        let mut machine = ProvisioningMachine::new(
            self.agents.as_ref(),
            &self.config.policies,
            draft,
            action_group,
        );

        loop {
            match machine.step().await {
                Ok(Some(transition)) => {
                    if transition.adopted {
                        METRICS.inc_agents_adopted();
                    }
                    if let Some(agent_id) = machine.agent_id() {
                        record.agent_id = Some(agent_id.0.clone());
                    }
                    if let Some(next) = transition.to.deployment_state() {
                        self.persist_transition(&mut record, transition.name, next)
                            .await?;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    if let Some(agent_id) = machine.agent_id() {
                        record.agent_id = Some(agent_id.0.clone());
                    }
                    let transition = machine.failed_transition().unwrap_or("provision");
                    return self.finish_failed(record, transition, err, started).await;
                }
            }
        }

        METRICS.inc_deployments_succeeded();
        obs::emit_deploy_finished(
            &record.deployment_id.0,
            record.state.as_str(),
            started.elapsed().as_millis() as u64,
            true,
        );
        info!(agent_id = ?record.agent_id, "deployment ready");
        Ok(HandleOutcome::Deployed { record })
    }

    /// Apply the artifact and wait for the rollout to finish.
    ///
    /// `apply_image` has side effects and is never retried blindly. A
    /// `Conflict` means another rollout is in flight (typically a duplicate
    /// delivery of the same event): wait for it to settle, then re-apply once
    /// only if the endpoint does not already run the artifact.
    async fn update_endpoint(&self, artifact: &ArtifactRef) -> Result<EndpointRef, DeployError> {
        let reference = match self.endpoint.apply_image(artifact).await {
            Ok(reference) => reference,
            Err(err) if err.kind == ProviderErrorKind::Conflict => {
                warn!(error = %err, "endpoint busy, waiting for in-flight rollout");
                self.wait_endpoint_ready().await?;
                self.reconcile_endpoint(artifact).await?
            }
            Err(err) => return Err(DeployError::EndpointUpdateFailed(err.to_string())),
        };
        info!(endpoint = %reference.target, digest = %reference.digest, "endpoint image applied");

        self.wait_endpoint_ready().await?;
        Ok(reference)
    }

    /// After a conflicting rollout settles, keep its result when it already
    /// runs `artifact`; otherwise apply once more.
    async fn reconcile_endpoint(&self, artifact: &ArtifactRef) -> Result<EndpointRef, DeployError> {
        let current = self
            .endpoint
            .current_image()
            .await
            .map_err(|err| DeployError::EndpointUpdateFailed(err.to_string()))?;
        match current {
            Some(current) if current.digest == artifact.digest => {
                debug!(digest = %current.digest, "endpoint already runs artifact");
                Ok(current)
            }
            _ => self
                .endpoint
                .apply_image(artifact)
                .await
                .map_err(|err| DeployError::EndpointUpdateFailed(err.to_string())),
        }
    }

    async fn wait_endpoint_ready(&self) -> Result<(), DeployError> {
        let endpoint = self.endpoint.as_ref();
        let policy = &self.config.policies.endpoint_ready;
        let ready = poll_until(policy, "endpoint rollout", || async move {
            match endpoint.status().await? {
                EndpointStatus::Ready => Ok(PollStatus::Done(())),
                EndpointStatus::Updating => Ok(PollStatus::Pending("updating".to_string())),
                EndpointStatus::Failed(reason) => Err(ProviderError::fatal(reason)),
            }
        })
        .await;

        match ready {
            Ok(()) => Ok(()),
            Err(PollError::TimedOut { waited_ms, .. }) => Err(DeployError::EndpointUpdateFailed(
                format!("endpoint not ready after {}ms", waited_ms),
            )),
            Err(PollError::Fatal(err)) => Err(DeployError::EndpointUpdateFailed(err.to_string())),
        }
    }

    async fn persist_transition(
        &self,
        record: &mut DeploymentRecord,
        transition: &str,
        next: DeploymentState,
    ) -> Result<(), DeployError> {
        let from = record.state;
        record.advance(next, self.clock.now())?;
        self.store.update(record).await?;
        obs::emit_transition(&record.deployment_id.0, transition, from.as_str(), next.as_str());
        Ok(())
    }

    async fn finish_failed(
        &self,
        mut record: DeploymentRecord,
        transition: &str,
        err: DeployError,
        started: Instant,
    ) -> Result<HandleOutcome, DeployError> {
        let Some(kind) = err.kind() else {
            return Err(err);
        };
        record.fail(kind, transition, err.to_string(), self.clock.now())?;
        self.store.update(&record).await?;

        METRICS.inc_deployments_failed();
        obs::emit_deploy_finished(
            &record.deployment_id.0,
            record.state.as_str(),
            started.elapsed().as_millis() as u64,
            false,
        );
        Ok(HandleOutcome::Failed { record })
    }
}
