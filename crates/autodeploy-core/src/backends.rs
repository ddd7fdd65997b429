//! Provider traits: the external systems a deployment talks to.
//!
//! - `ImageRegistry`: lists published images for a repository
//! - `ToolEndpoint`: the single mutable compute target all agents invoke
//! - `AgentApi`: agent-management API (create, attach, prepare, status)
//! - `BuildRunner`: starts image builds and reports their status
//!
//! Every call returns a [`ProviderError`] classified by [`ProviderErrorKind`]
//! so callers can tell retryable blips from terminal failures without
//! looking at provider-specific codes.

use std::fmt;

use async_trait::async_trait;
use autodeploy_state::{ArtifactRef, EndpointRef};
use serde::{Deserialize, Serialize};

use crate::domain::ToolSchema;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Provider-neutral error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Throttling, 5xx, network trouble. Safe to retry read-only calls.
    Transient,
    /// Resource already exists or is in a conflicting state.
    Conflict,
    NotFound,
    /// Request rejected as invalid.
    Validation,
    Fatal,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::Conflict => "conflict",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::Validation => "validation",
            ProviderErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Validation, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Fatal, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Image registry
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// All images currently in `repository`, in no particular order.
    async fn list_images(&self, repository: &str) -> ProviderResult<Vec<ArtifactRef>>;
}

/// Pick the most recently pushed image. Ties on push time fall back to the
/// digest so the choice is stable across calls.
pub fn newest_artifact(images: Vec<ArtifactRef>) -> Option<ArtifactRef> {
    images.into_iter().max_by(|a, b| {
        a.pushed_at
            .cmp(&b.pushed_at)
            .then_with(|| a.digest.as_str().cmp(b.digest.as_str()))
    })
}

// ---------------------------------------------------------------------------
// Tool-execution endpoint
// ---------------------------------------------------------------------------

/// Rollout state of the endpoint after an image change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EndpointStatus {
    Updating,
    Ready,
    Failed(String),
}

#[async_trait]
pub trait ToolEndpoint: Send + Sync {
    /// Point the endpoint at `artifact`. Atomic and idempotent: applying the
    /// image it already runs is a no-op.
    async fn apply_image(&self, artifact: &ArtifactRef) -> ProviderResult<EndpointRef>;

    /// Status of the most recent image change.
    async fn status(&self) -> ProviderResult<EndpointStatus>;

    /// The image the endpoint currently runs, if it runs a digest-pinned image.
    async fn current_image(&self) -> ProviderResult<Option<EndpointRef>>;
}

// ---------------------------------------------------------------------------
// Agent-management API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to create one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDraft {
    pub name: String,
    pub foundation_model: String,
    pub instruction: String,
    pub role_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AgentStatus {
    Creating,
    NotPrepared,
    Preparing,
    Prepared,
    Updating,
    Failed(String),
}

impl AgentStatus {
    /// Provider is still working on a previous request.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            AgentStatus::Creating | AgentStatus::Preparing | AgentStatus::Updating
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Creating => f.write_str("creating"),
            AgentStatus::NotPrepared => f.write_str("not_prepared"),
            AgentStatus::Preparing => f.write_str("preparing"),
            AgentStatus::Prepared => f.write_str("prepared"),
            AgentStatus::Updating => f.write_str("updating"),
            AgentStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// An existing agent found by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
}

/// Binding of an agent to the tool endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionGroupSpec {
    pub name: String,
    /// Endpoint target (function ARN) invoked for every tool call
    pub executor_target: String,
    pub schema: ToolSchema,
}

#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Create an agent. Name collisions surface as `Conflict`.
    async fn create_agent(&self, draft: &AgentDraft) -> ProviderResult<AgentId>;

    /// Look an agent up by exact name. Eventually consistent with creation.
    async fn find_agent_by_name(&self, name: &str) -> ProviderResult<Option<AgentSummary>>;

    async fn get_status(&self, agent_id: &AgentId) -> ProviderResult<AgentStatus>;

    /// Names of the action groups attached to the working draft.
    async fn list_action_groups(&self, agent_id: &AgentId) -> ProviderResult<Vec<String>>;

    /// Attach an action group. Schema problems surface as `Validation`,
    /// an existing group with the same name as `Conflict`.
    async fn attach_action_group(
        &self,
        agent_id: &AgentId,
        spec: &ActionGroupSpec,
    ) -> ProviderResult<()>;

    /// Start preparation. Completes asynchronously on the provider side.
    async fn prepare(&self, agent_id: &AgentId) -> ProviderResult<()>;
}

// ---------------------------------------------------------------------------
// Build runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BuildStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Start a build of the configured source. Not idempotent.
    async fn start_build(&self) -> ProviderResult<BuildId>;

    async fn build_status(&self, build_id: &BuildId) -> ProviderResult<BuildStatus>;
}
