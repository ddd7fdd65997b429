//! Observability tests for the deployment lifecycle.
//!
//! Events are captured with a thread-local JSON subscriber and checked for
//! the structured fields operators filter on.

use std::io;
use std::sync::{Arc, Mutex};

use autodeploy_core::fakes::{CallLog, FakeAgentApi, FakeEndpoint, FakeRegistry};
use autodeploy_core::obs::{
    deployment_span, emit_artifact_not_found, emit_client_phase, emit_deploy_finished,
    emit_deploy_started, emit_event_ignored, emit_transition,
};
use autodeploy_core::{DeployConfig, Orchestrator, Policies, PublishEvent, RetryPolicy};
use autodeploy_state::fakes::{MemoryDeploymentStore, MemoryEndpointLedger};
use autodeploy_state::{ArtifactRef, ImageDigest};
use chrono::{TimeZone, Utc};
use tracing::subscriber::DefaultGuard;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture() -> (Captured, DefaultGuard) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::TRACE)
        .with_current_span(true)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (captured, guard)
}

#[test]
fn started_event_carries_identifiers() {
    let (captured, _guard) = capture();
    emit_deploy_started("d-123", "agent-core-20240305-070809", "sha256:abc");

    assert!(captured.contains(r#""event":"deploy.started""#));
    assert!(captured.contains(r#""deployment_id":"d-123""#));
    assert!(captured.contains(r#""digest":"sha256:abc""#));
}

#[test]
fn failed_finish_is_a_warning() {
    let (captured, _guard) = capture();
    emit_deploy_finished("d-456", "failed", 5000, false);
    emit_deploy_finished("d-457", "ready", 4000, true);

    let lines = captured.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(r#""level":"WARN""#));
    assert!(lines[1].contains(r#""level":"INFO""#));
}

#[test]
fn events_inside_deployment_span_carry_span_fields() {
    let (captured, _guard) = capture();
    {
        let _entered = deployment_span("d-789", "agent-core-20240305-070809").entered();
        emit_transition("d-789", "create_agent", "endpoint_updated", "created");
    }

    let line = captured
        .lines()
        .into_iter()
        .find(|l| l.contains("deploy.transition"))
        .expect("transition event");
    assert!(line.contains("autodeploy.deployment"));
    assert!(line.contains(r#""agent_name":"agent-core-20240305-070809""#));
    assert!(line.contains(r#""to":"created""#));
}

#[test]
fn ignored_and_client_phase_events() {
    let (captured, _guard) = capture();
    emit_event_ignored("other-repo", &"repository other-repo does not match agent-core-tools");
    emit_client_phase("wait_build", 1200, true);

    assert!(captured.contains(r#""event":"deploy.event_ignored""#));
    assert!(captured.contains(r#""phase":"wait_build""#));
}

#[test]
fn artifact_not_found_is_a_warning() {
    let (captured, _guard) = capture();
    emit_artifact_not_found("agent-core-tools");

    let lines = captured.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(r#""level":"WARN""#));
    assert!(lines[0].contains(r#""event":"deploy.artifact_not_found""#));
    assert!(lines[0].contains(r#""repository":"agent-core-tools""#));
}

#[tokio::test(start_paused = true)]
async fn empty_repository_leaves_a_warning() {
    let (captured, _guard) = capture();

    let log = CallLog::new();
    let orchestrator = Orchestrator::new(
        DeployConfig {
            agent_role_arn: "arn:aws:iam::123456789012:role/AgentRole".to_string(),
            ..DeployConfig::default()
        },
        Arc::new(FakeRegistry::new(log.clone())),
        Arc::new(FakeEndpoint::new(log.clone())),
        Arc::new(FakeAgentApi::new(log)),
        Arc::new(MemoryDeploymentStore::new()),
        Arc::new(MemoryEndpointLedger::new()),
    );
    let event = PublishEvent::from_json(
        br#"{"repository-name": "agent-core-tools", "result": "SUCCESS"}"#,
    )
    .unwrap();

    assert!(orchestrator.handle(&event).await.is_err());
    assert!(captured.contains(r#""event":"deploy.artifact_not_found""#));
    assert!(!captured.contains(r#""event":"deploy.started""#));
}

#[tokio::test(start_paused = true)]
async fn orchestration_emits_lifecycle_events() {
    let (captured, _guard) = capture();

    let log = CallLog::new();
    let registry = FakeRegistry::new(log.clone()).with_images(vec![ArtifactRef {
        repository: "agent-core-tools".to_string(),
        registry_id: "123456789012".to_string(),
        digest: ImageDigest::parse("sha256:abc").unwrap(),
        tags: vec![],
        pushed_at: Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap(),
    }]);
    let config = DeployConfig {
        agent_role_arn: "arn:aws:iam::123456789012:role/AgentRole".to_string(),
        policies: Policies {
            agent_settle: RetryPolicy::fixed(10, 1_000),
            preparation: RetryPolicy::fixed(10, 1_000),
            endpoint_ready: RetryPolicy::fixed(10, 1_000),
            ..Policies::default()
        },
        ..DeployConfig::default()
    };
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(registry),
        Arc::new(FakeEndpoint::new(log.clone())),
        Arc::new(FakeAgentApi::new(log)),
        Arc::new(MemoryDeploymentStore::new()),
        Arc::new(MemoryEndpointLedger::new()),
    );
    let event = PublishEvent::from_json(
        br#"{"repository-name": "agent-core-tools", "result": "SUCCESS"}"#,
    )
    .unwrap();

    orchestrator.handle(&event).await.unwrap();

    assert!(captured.contains(r#""event":"deploy.started""#));
    for state in [
        "endpoint_updated",
        "created",
        "action_group_attached",
        "prepared",
        "ready",
    ] {
        assert!(
            captured.contains(&format!(r#""to":"{}""#, state)),
            "missing transition to {}",
            state
        );
    }
    assert!(captured.contains(r#""event":"deploy.finished""#));
}
