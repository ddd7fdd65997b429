//! Persisted record types for agent deployments.
//!
//! - `ArtifactRef`: immutable pointer to a published container image
//! - `DeploymentRecord`: one orchestration run and its lifecycle state
//! - `EndpointRecord`: an applied tool-execution endpoint reference
//!
//! State ordering is enforced here so every backend shares the same rules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

// ---------------------------------------------------------------------------
// ImageDigest
// ---------------------------------------------------------------------------

/// Content digest of a container image (`<algorithm>:<hex>`).
///
/// The inner field is private so a value always carries a known algorithm
/// prefix and a non-empty lowercase hex body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageDigest(String);

impl ImageDigest {
    /// Parse and normalise a digest string such as `sha256:9f86d0...`.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidDigest {
            digest: raw.to_string(),
        };
        let (algorithm, body) = raw.split_once(':').ok_or_else(invalid)?;
        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '.' || c == '_')
        {
            return Err(invalid());
        }
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(ImageDigest(format!(
            "{}:{}",
            algorithm.to_ascii_lowercase(),
            body.to_ascii_lowercase()
        )))
    }

    /// Full digest string including the algorithm prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Algorithm prefix (e.g. `sha256`).
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    /// Hex body without the algorithm prefix.
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or_default()
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..12.min(hex.len())]
    }
}

impl TryFrom<String> for ImageDigest {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ImageDigest::parse(&s)
    }
}

impl From<ImageDigest> for String {
    fn from(d: ImageDigest) -> Self {
        d.0
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ArtifactRef
// ---------------------------------------------------------------------------

/// Immutable reference to one published image in a registry repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Repository the image was pushed to
    pub repository: String,
    /// Registry (account) that owns the repository
    pub registry_id: String,
    /// Image content digest
    pub digest: ImageDigest,
    /// Tags pointing at this digest when it was resolved
    pub tags: Vec<String>,
    /// Push timestamp reported by the registry
    pub pushed_at: DateTime<Utc>,
}

impl ArtifactRef {
    /// Fully qualified, digest-pinned image URI for the given region.
    pub fn image_uri(&self, region: &str) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}@{}",
            self.registry_id, region, self.repository, self.digest
        )
    }
}

// ---------------------------------------------------------------------------
// VersionLabel
// ---------------------------------------------------------------------------

/// Human-ordered deployment version, second resolution (`20240131-235959`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionLabel(String);

impl VersionLabel {
    /// `chrono` format used to render labels.
    pub const FORMAT: &'static str = "%Y%m%d-%H%M%S";

    /// Render the label for a timestamp. Sub-second precision is dropped.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        VersionLabel(ts.format(Self::FORMAT).to_string())
    }

    /// Parse a previously rendered label.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        chrono::NaiveDateTime::parse_from_str(raw, Self::FORMAT).map_err(|_| {
            StorageError::InvalidVersionLabel {
                label: raw.to_string(),
            }
        })?;
        Ok(VersionLabel(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        VersionLabel::parse(&s)
    }
}

impl From<VersionLabel> for String {
    fn from(v: VersionLabel) -> Self {
        v.0
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeploymentState
// ---------------------------------------------------------------------------

/// Lifecycle of a deployment record.
///
/// Non-failed states are totally ordered and only ever move forward.
/// `Failed` is absorbing and reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Received,
    EndpointUpdated,
    Created,
    ActionGroupAttached,
    Prepared,
    Ready,
    Failed,
}

impl DeploymentState {
    fn rank(self) -> u8 {
        match self {
            DeploymentState::Received => 0,
            DeploymentState::EndpointUpdated => 1,
            DeploymentState::Created => 2,
            DeploymentState::ActionGroupAttached => 3,
            DeploymentState::Prepared => 4,
            DeploymentState::Ready => 5,
            DeploymentState::Failed => u8::MAX,
        }
    }

    /// `Ready` and `Failed` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentState::Ready | DeploymentState::Failed)
    }

    /// Whether a record in `self` may be rewritten with state `next`.
    ///
    /// Equal states are allowed so attributes can be filled in without a
    /// transition; terminal records accept nothing.
    pub fn permits(self, next: DeploymentState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == DeploymentState::Failed || next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::Received => "received",
            DeploymentState::EndpointUpdated => "endpoint_updated",
            DeploymentState::Created => "created",
            DeploymentState::ActionGroupAttached => "action_group_attached",
            DeploymentState::Prepared => "prepared",
            DeploymentState::Ready => "ready",
            DeploymentState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Terminal failure classes recorded on a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    ArtifactNotFound,
    EndpointUpdateFailed,
    SchemaRejected,
    PreparationTimeout,
    ProvisioningApiError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ArtifactNotFound => "ArtifactNotFound",
            FailureKind::EndpointUpdateFailed => "EndpointUpdateFailed",
            FailureKind::SchemaRejected => "SchemaRejected",
            FailureKind::PreparationTimeout => "PreparationTimeout",
            FailureKind::ProvisioningApiError => "ProvisioningAPIError",
        };
        f.write_str(s)
    }
}

/// Why and where a deployment stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: FailureKind,
    /// Name of the transition that failed (e.g. `attach_action_group`)
    pub transition: String,
    /// Last state the record reached before failing
    pub last_successful_step: DeploymentState,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Endpoint references
// ---------------------------------------------------------------------------

/// Pointer from the tool-execution endpoint to the image it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    /// Function ARN (or name) the agent's action group invokes
    pub target: String,
    /// Digest-pinned image URI the endpoint runs
    pub image_uri: String,
    pub digest: ImageDigest,
}

/// One applied endpoint update, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub endpoint: EndpointRef,
    pub deployment_id: DeploymentId,
    pub applied_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DeploymentRecord
// ---------------------------------------------------------------------------

/// Unique identifier for a deployment record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub String);

impl DeploymentId {
    /// Generate a new random DeploymentId
    pub fn new() -> Self {
        DeploymentId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One invocation of the deployment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: DeploymentId,
    pub version: VersionLabel,
    /// Agent name derived from `version`
    pub agent_name: String,
    pub artifact: ArtifactRef,
    pub state: DeploymentState,
    /// Provider-assigned agent id, once known
    pub agent_id: Option<String>,
    /// Endpoint reference applied for this deployment
    pub endpoint: Option<EndpointRef>,
    pub failure: Option<FailureInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a record in the `Received` state.
    pub fn new(
        version: VersionLabel,
        agent_name: impl Into<String>,
        artifact: ArtifactRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            deployment_id: DeploymentId::new(),
            version,
            agent_name: agent_name.into(),
            artifact,
            state: DeploymentState::Received,
            agent_id: None,
            endpoint: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move forward to `next`. Regressions and moves out of a terminal
    /// state are rejected.
    pub fn advance(&mut self, next: DeploymentState, now: DateTime<Utc>) -> Result<(), StorageError> {
        if next == self.state || !self.state.permits(next) {
            return Err(self.transition_error(next));
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the record failed, remembering the last state it reached.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        transition: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if self.state.is_terminal() {
            return Err(self.transition_error(DeploymentState::Failed));
        }
        self.failure = Some(FailureInfo {
            kind,
            transition: transition.into(),
            last_successful_step: self.state,
            message: message.into(),
        });
        self.state = DeploymentState::Failed;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition_error(&self, next: DeploymentState) -> StorageError {
        if self.state.is_terminal() {
            StorageError::TerminalRecord {
                deployment_id: self.deployment_id.0.clone(),
                state: self.state.to_string(),
            }
        } else {
            StorageError::StateRegression {
                deployment_id: self.deployment_id.0.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            }
        }
    }
}
