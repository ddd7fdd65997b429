//! Structured observability hooks for the deployment lifecycle.
//!
//! - Deployment-scoped tracing spans via `deployment_span`
//! - Emission functions for lifecycle events: ignored, artifact not found,
//!   started, transition, finished, poll retry, client phase
//!
//! Events are emitted at `info!` level (warnings at `warn!`). Filter with
//! `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use tracing::{info, warn};

/// Deployment-scoped span. Attach it with `tracing::Instrument` so every
/// event of one deployment carries its id and agent name.
///
/// ```ignore
/// run_deployment(record)
///     .instrument(obs::deployment_span(&id, &name))
///     .await
/// ```
pub fn deployment_span(deployment_id: &str, agent_name: &str) -> tracing::Span {
    tracing::info_span!(
        "autodeploy.deployment",
        deployment_id = %deployment_id,
        agent_name = %agent_name,
    )
}

/// Emit event: a publish event did not qualify.
pub fn emit_event_ignored(repository: &str, reason: &dyn std::fmt::Display) {
    info!(event = "deploy.event_ignored", repository = %repository, reason = %reason);
}

/// Emit event: a qualifying event found no deployable image. No record is
/// written, so this is the only trace of the dropped event.
pub fn emit_artifact_not_found(repository: &str) {
    warn!(event = "deploy.artifact_not_found", repository = %repository);
}

/// Emit event: deployment record created for an artifact.
pub fn emit_deploy_started(deployment_id: &str, agent_name: &str, digest: &str) {
    info!(
        event = "deploy.started",
        deployment_id = %deployment_id,
        agent_name = %agent_name,
        digest = %digest,
    );
}

/// Emit event: record moved between states.
pub fn emit_transition(deployment_id: &str, transition: &str, from: &str, to: &str) {
    info!(
        event = "deploy.transition",
        deployment_id = %deployment_id,
        transition = %transition,
        from = %from,
        to = %to,
    );
}

/// Emit event: deployment reached a terminal state.
pub fn emit_deploy_finished(deployment_id: &str, state: &str, duration_ms: u64, success: bool) {
    if success {
        info!(
            event = "deploy.finished",
            deployment_id = %deployment_id,
            state = %state,
            duration_ms = duration_ms,
            success = success,
        );
    } else {
        warn!(
            event = "deploy.finished",
            deployment_id = %deployment_id,
            state = %state,
            duration_ms = duration_ms,
            success = success,
        );
    }
}

/// Emit event: a transient error during polling or a read-only call.
pub fn emit_poll_retry(what: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(event = "deploy.poll_retry", what = %what, attempt = attempt, error = %error);
}

/// Emit event: deployment client finished a phase.
pub fn emit_client_phase(phase: &str, elapsed_ms: u64, ok: bool) {
    info!(event = "client.phase", phase = %phase, elapsed_ms = elapsed_ms, ok = ok);
}
