use std::sync::Arc;

use autodeploy_core::fakes::{CallLog, FakeAgentApi, FakeEndpoint, FakeRegistry, PrepareOutcome};
use autodeploy_core::{
    AgentStatus, DeployConfig, DeployError, EndpointStatus, FixedClock, HandleOutcome,
    Orchestrator, Policies, ProviderError, PublishEvent, RetryPolicy, SkipReason,
};
use autodeploy_state::fakes::{MemoryDeploymentStore, MemoryEndpointLedger};
use autodeploy_state::{
    ArtifactRef, DeploymentState, DeploymentStore, EndpointLedger, FailureKind, ImageDigest,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const REPO: &str = "agent-core-tools";
const AGENT_NAME: &str = "agent-core-20240305-070809";

fn pushed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
}

fn artifact(digest: &str, pushed_at: DateTime<Utc>) -> ArtifactRef {
    ArtifactRef {
        repository: REPO.to_string(),
        registry_id: "123456789012".to_string(),
        digest: ImageDigest::parse(digest).expect("digest"),
        tags: vec!["latest".to_string()],
        pushed_at,
    }
}

fn fast_policies() -> Policies {
    Policies {
        registry: RetryPolicy::fixed(10, 100),
        endpoint_ready: RetryPolicy::fixed(10, 1_000),
        agent_settle: RetryPolicy::fixed(10, 1_000),
        adopt: RetryPolicy::fixed(10, 1_000),
        preparation: RetryPolicy::exponential(10, 2.0, 100, 5_000),
        build: RetryPolicy::fixed(10, 1_000),
        endpoint_reflect: RetryPolicy::fixed(10, 1_000),
    }
}

fn config() -> DeployConfig {
    DeployConfig {
        agent_role_arn: "arn:aws:iam::123456789012:role/AgentRole".to_string(),
        policies: fast_policies(),
        ..DeployConfig::default()
    }
}

fn push_event(repo: &str, result: &str) -> PublishEvent {
    PublishEvent::from_value(json!({
        "version": "0",
        "source": "aws.ecr",
        "detail-type": "ECR Image Action",
        "time": "2024-03-05T07:08:12Z",
        "detail": {
            "repository-name": repo,
            "result": result,
            "action-type": "PUSH",
            "image-digest": "sha256:abc",
            "image-tag": "latest"
        }
    }))
    .expect("event")
}

struct Harness {
    log: CallLog,
    registry: Arc<FakeRegistry>,
    endpoint: Arc<FakeEndpoint>,
    agents: Arc<FakeAgentApi>,
    store: Arc<MemoryDeploymentStore>,
    ledger: Arc<MemoryEndpointLedger>,
}

impl Harness {
    fn new(images: Vec<ArtifactRef>) -> Self {
        Self::with_agents(images, FakeAgentApi::new)
    }

    fn with_agents(images: Vec<ArtifactRef>, agents: impl FnOnce(CallLog) -> FakeAgentApi) -> Self {
        let log = CallLog::new();
        Self {
            registry: Arc::new(FakeRegistry::new(log.clone()).with_images(images)),
            endpoint: Arc::new(FakeEndpoint::new(log.clone())),
            agents: Arc::new(agents(log.clone())),
            store: Arc::new(MemoryDeploymentStore::new()),
            ledger: Arc::new(MemoryEndpointLedger::new()),
            log,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            config(),
            self.registry.clone(),
            self.endpoint.clone(),
            self.agents.clone(),
            self.store.clone(),
            self.ledger.clone(),
        )
        .with_clock(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 7, 9, 0).unwrap(),
        )))
    }
}

fn deployed(outcome: HandleOutcome) -> autodeploy_state::DeploymentRecord {
    match outcome {
        HandleOutcome::Deployed { record } => record,
        other => panic!("expected Deployed, got {:?}", other),
    }
}

fn failed(outcome: HandleOutcome) -> autodeploy_state::DeploymentRecord {
    match outcome {
        HandleOutcome::Failed { record } => record,
        other => panic!("expected Failed, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn push_event_deploys_prepared_agent_bound_to_endpoint() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);

    let record = deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .expect("handle"),
    );

    assert_eq!(record.state, DeploymentState::Ready);
    assert_eq!(record.agent_name, AGENT_NAME);
    assert_eq!(record.artifact.digest.as_str(), "sha256:abc");
    assert!(record.failure.is_none());

    let agents = h.agents.agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].status, AgentStatus::Prepared);
    assert_eq!(record.agent_id.as_deref(), Some(agents[0].id.0.as_str()));

    let groups = h.agents.action_groups(&agents[0].id);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "core-tools");
    assert_eq!(groups[0].executor_target, h.endpoint.target());
    assert_eq!(groups[0].schema.len(), 3);

    let endpoint = record.endpoint.expect("endpoint recorded");
    assert_eq!(endpoint.digest.as_str(), "sha256:abc");
    assert_eq!(
        endpoint.image_uri,
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/agent-core-tools@sha256:abc"
    );

    let last = h.ledger.last_applied().await.unwrap().expect("ledger entry");
    assert_eq!(last.endpoint.digest.as_str(), "sha256:abc");
    assert_eq!(last.deployment_id, record.deployment_id);

    let stored = h.store.get(&record.deployment_id).await.unwrap();
    assert_eq!(stored.state, DeploymentState::Ready);
}

#[tokio::test(start_paused = true)]
async fn newest_image_wins() {
    let older = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
    let h = Harness::new(vec![
        artifact("sha256:01d", older),
        artifact("sha256:0e1", pushed_at()),
    ]);

    let record = deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );
    assert_eq!(record.artifact.digest.as_str(), "sha256:0e1");
    assert_eq!(h.endpoint.applied().len(), 1);
    assert_eq!(h.endpoint.applied()[0].digest.as_str(), "sha256:0e1");
}

#[tokio::test(start_paused = true)]
async fn endpoint_update_completes_before_any_agent_call() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let apply = h.log.first("endpoint.apply_image").expect("apply called");
    let last_status = h.log.last("endpoint.status").expect("rollout polled");
    let first_agent = h.log.first("agent.").expect("agent calls");
    assert!(apply < last_status);
    assert!(last_status < first_agent);
    assert_eq!(h.log.count("endpoint.apply_image"), 1);
}

// ---------------------------------------------------------------------------
// Ignored events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_push_is_ignored_without_side_effects() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let outcome = h
        .orchestrator()
        .handle(&push_event(REPO, "FAILURE"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        HandleOutcome::Ignored {
            reason: SkipReason::ResultNotSuccess
        }
    );
    assert!(h.log.is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn other_repository_is_ignored() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let outcome = h
        .orchestrator()
        .handle(&push_event("some-other-repo", "SUCCESS"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        HandleOutcome::Ignored {
            reason: SkipReason::RepositoryMismatch { .. }
        }
    ));
    assert!(h.log.is_empty());
    assert!(h.store.is_empty());
}

// ---------------------------------------------------------------------------
// Missing artifact
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_repository_is_artifact_not_found() {
    let h = Harness::new(vec![]);
    let err = h
        .orchestrator()
        .handle(&push_event(REPO, "SUCCESS"))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ArtifactNotFound { .. }));
    assert_eq!(err.kind(), Some(FailureKind::ArtifactNotFound));
    assert_eq!(h.log.count("endpoint."), 0);
    assert_eq!(h.log.count("agent."), 0);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_registry_error_is_retried() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    h.registry
        .fail_next(ProviderError::transient("throttled"));

    deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );
    assert_eq!(h.log.count("registry.list_images"), 2);
}

// ---------------------------------------------------------------------------
// Duplicate delivery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn redelivered_event_adopts_existing_agent() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let orchestrator = h.orchestrator();
    let event = push_event(REPO, "SUCCESS");

    let first = deployed(orchestrator.handle(&event).await.unwrap());
    let second = deployed(orchestrator.handle(&event).await.unwrap());

    assert_eq!(h.agents.agents_named(AGENT_NAME), 1);
    assert_eq!(first.agent_id, second.agent_id);
    assert_ne!(first.deployment_id, second.deployment_id);
    assert_eq!(h.store.len(), 2);

    let agent_id = h.agents.agents()[0].id.clone();
    assert_eq!(h.agents.action_groups(&agent_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_deliveries_create_one_agent() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let orchestrator = h.orchestrator();
    let event = push_event(REPO, "SUCCESS");

    let (a, b) = tokio::join!(orchestrator.handle(&event), orchestrator.handle(&event));
    let a = deployed(a.unwrap());
    let b = deployed(b.unwrap());

    assert_eq!(h.agents.agents_named(AGENT_NAME), 1);
    assert_eq!(a.agent_id, b.agent_id);
    let agent_id = h.agents.agents()[0].id.clone();
    assert_eq!(h.agents.action_groups(&agent_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn redelivery_during_rollout_waits_instead_of_failing() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let orchestrator = h.orchestrator();
    let event = push_event(REPO, "SUCCESS");

    let first = deployed(orchestrator.handle(&event).await.unwrap());

    h.endpoint.fail_next_apply(ProviderError::conflict(
        "ResourceConflictException (HTTP 409): An update is in progress",
    ));
    h.endpoint
        .script_statuses(vec![EndpointStatus::Updating, EndpointStatus::Ready]);
    let second = deployed(orchestrator.handle(&event).await.unwrap());

    assert_eq!(first.agent_id, second.agent_id);
    assert_eq!(h.agents.agents_named(AGENT_NAME), 1);
    assert_eq!(
        second.endpoint.as_ref().map(|e| e.digest.as_str()),
        Some("sha256:abc")
    );
    // the in-flight rollout already runs the artifact
    assert_eq!(h.endpoint.applied().len(), 1);
    assert_eq!(h.log.count("endpoint.apply_image"), 2);
}

#[tokio::test(start_paused = true)]
async fn conflict_on_older_image_reapplies_once() {
    let h = Harness::new(vec![artifact("sha256:0e1", pushed_at())]);
    let older = h
        .endpoint
        .reference_for(&artifact("sha256:01d", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
    h.endpoint.set_current(Some(older));
    h.endpoint
        .fail_next_apply(ProviderError::conflict("update in progress"));

    let record = deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    assert_eq!(h.log.count("endpoint.apply_image"), 2);
    assert_eq!(h.endpoint.applied().len(), 1);
    assert_eq!(
        record.endpoint.map(|e| e.digest.as_str().to_string()),
        Some("sha256:0e1".to_string())
    );
    assert!(
        h.log.last("endpoint.apply_image").unwrap() < h.log.first("agent.").unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn conflict_then_failed_rollout_fails_endpoint_update() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    h.endpoint
        .fail_next_apply(ProviderError::conflict("update in progress"));
    h.endpoint
        .script_statuses(vec![EndpointStatus::Failed("image pull failed".to_string())]);

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::EndpointUpdateFailed);
    assert_eq!(h.log.count("endpoint.apply_image"), 1);
    assert_eq!(h.log.count("agent."), 0);
}

#[tokio::test(start_paused = true)]
async fn resumes_agent_left_with_action_group() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    let group = autodeploy_core::ActionGroupSpec {
        name: "core-tools".to_string(),
        executor_target: h.endpoint.target().to_string(),
        schema: config().tools,
    };
    let seeded = h
        .agents
        .seed_agent(AGENT_NAME, AgentStatus::NotPrepared, vec![group]);

    let record = deployed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    assert_eq!(record.agent_id.as_deref(), Some(seeded.0.as_str()));
    assert_eq!(h.agents.agents_named(AGENT_NAME), 1);
    assert_eq!(h.log.count("agent.attach_action_group"), 0);
    assert_eq!(h.log.count("agent.prepare"), 1);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rejected_schema_fails_after_creation() {
    let h = Harness::with_agents(vec![artifact("sha256:abc", pushed_at())], |log| {
        FakeAgentApi::new(log).rejecting_schema("parameter type `date` is not supported")
    });

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::SchemaRejected);
    assert_eq!(failure.transition, "attach_action_group");
    assert_eq!(failure.last_successful_step, DeploymentState::Created);
    assert!(failure.message.contains("date"));
    assert!(record.agent_id.is_some());
    assert_eq!(h.log.count("agent.prepare"), 0);

    let stored = h.store.get(&record.deployment_id).await.unwrap();
    assert_eq!(stored.state, DeploymentState::Failed);
}

#[tokio::test(start_paused = true)]
async fn preparation_that_never_finishes_times_out() {
    let h = Harness::with_agents(vec![artifact("sha256:abc", pushed_at())], |log| {
        FakeAgentApi::new(log).with_prepare_outcome(PrepareOutcome::Never)
    });

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::PreparationTimeout);
    assert_eq!(failure.transition, "prepare");
    assert_eq!(failure.last_successful_step, DeploymentState::ActionGroupAttached);
}

#[tokio::test(start_paused = true)]
async fn failed_preparation_is_provisioning_error() {
    let h = Harness::with_agents(vec![artifact("sha256:abc", pushed_at())], |log| {
        FakeAgentApi::new(log).with_prepare_outcome(PrepareOutcome::Failed(
            "role cannot be assumed".to_string(),
        ))
    });

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );
    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::ProvisioningApiError);
    assert!(failure.message.contains("role cannot be assumed"));
}

#[tokio::test(start_paused = true)]
async fn rejected_image_fails_endpoint_update_without_agent_calls() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    h.endpoint
        .fail_next_apply(ProviderError::validation("image manifest not supported"));

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::EndpointUpdateFailed);
    assert_eq!(failure.transition, "update_endpoint");
    assert_eq!(failure.last_successful_step, DeploymentState::Received);
    assert_eq!(h.log.count("agent."), 0);
    assert!(h.ledger.last_applied().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_rollout_fails_endpoint_update() {
    let h = Harness::new(vec![artifact("sha256:abc", pushed_at())]);
    h.endpoint.script_statuses(vec![
        EndpointStatus::Updating,
        EndpointStatus::Failed("image pull failed".to_string()),
    ]);

    let record = failed(
        h.orchestrator()
            .handle(&push_event(REPO, "SUCCESS"))
            .await
            .unwrap(),
    );

    let failure = record.failure.expect("failure info");
    assert_eq!(failure.kind, FailureKind::EndpointUpdateFailed);
    assert!(failure.message.contains("image pull failed"));
    assert_eq!(h.log.count("agent."), 0);
}
