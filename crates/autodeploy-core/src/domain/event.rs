//! Inbound image-publish events.
//!
//! The event bus delivers a JSON envelope whose `detail` object describes
//! one registry action. Payloads are parsed into [`PublishEvent`] at the
//! boundary; anything that does not deserialize is rejected with
//! [`EventError`] before the orchestrator sees it.
//!
//! Accepted shapes:
//!
//! ```json
//! {"source": "aws.ecr", "detail-type": "ECR Image Action", "time": "...",
//!  "detail": {"repository-name": "agent-core-tools", "result": "SUCCESS",
//!             "action-type": "PUSH", "image-digest": "sha256:...", "image-tag": "latest"}}
//! ```
//!
//! or the bare `detail` object on its own.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors produced while parsing an event payload.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("event payload must be a JSON object")]
    NotAnObject,

    #[error("malformed event detail: {0}")]
    MalformedDetail(String),
}

/// Outcome reported by the registry for the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishResult {
    Success,
    Failure,
    /// Any result the registry adds later. Never qualifies.
    #[serde(other)]
    Other,
}

/// Registry action that produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Push,
    Delete,
    #[serde(other)]
    Other,
}

/// The `detail` section of a publish event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishDetail {
    #[serde(rename = "repository-name")]
    pub repository_name: String,
    pub result: PublishResult,
    #[serde(rename = "action-type", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(rename = "image-digest", default, skip_serializing_if = "Option::is_none")]
    pub image_digest: Option<String>,
    #[serde(rename = "image-tag", default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "detail-type", default)]
    detail_type: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    detail: PublishDetail,
}

/// A validated image-publish event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishEvent {
    pub source: Option<String>,
    pub detail_type: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub detail: PublishDetail,
}

/// Why an event does not trigger a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    RepositoryMismatch { expected: String, actual: String },
    ResultNotSuccess,
    ActionNotPush,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::RepositoryMismatch { expected, actual } => {
                write!(f, "repository {} does not match {}", actual, expected)
            }
            SkipReason::ResultNotSuccess => f.write_str("action result is not SUCCESS"),
            SkipReason::ActionNotPush => f.write_str("action type is not PUSH"),
        }
    }
}

impl PublishEvent {
    /// Parse raw bytes (envelope or bare detail).
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse an already decoded JSON value (envelope or bare detail).
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let obj = value.as_object().ok_or(EventError::NotAnObject)?;

        if obj.contains_key("detail") {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|e| EventError::MalformedDetail(e.to_string()))?;
            return Ok(PublishEvent {
                source: envelope.source,
                detail_type: envelope.detail_type,
                time: envelope.time,
                detail: envelope.detail,
            });
        }

        let detail: PublishDetail = serde_json::from_value(value)
            .map_err(|e| EventError::MalformedDetail(e.to_string()))?;
        Ok(PublishEvent {
            source: None,
            detail_type: None,
            time: None,
            detail,
        })
    }

    /// Whether this event should trigger a deployment for `repository`.
    ///
    /// A missing action type counts as a push; older payloads omit it.
    pub fn qualifies(&self, repository: &str) -> Result<(), SkipReason> {
        if self.detail.repository_name != repository {
            return Err(SkipReason::RepositoryMismatch {
                expected: repository.to_string(),
                actual: self.detail.repository_name.clone(),
            });
        }
        if self.detail.result != PublishResult::Success {
            return Err(SkipReason::ResultNotSuccess);
        }
        if matches!(
            self.detail.action_type,
            Some(ActionType::Delete | ActionType::Other)
        ) {
            return Err(SkipReason::ActionNotPush);
        }
        Ok(())
    }

    pub fn repository(&self) -> &str {
        &self.detail.repository_name
    }
}
