//! Domain models for agent-autodeploy.
//!
//! - `PublishEvent`: the inbound image-publish notification
//! - `ToolSchema`: capability schema attached to every new agent
//! - `LabelSource` / `Clock`: how version labels and agent names are derived
//! - `DeployError`: failure taxonomy surfaced to callers and records

pub mod error;
pub mod event;
pub mod schema;
pub mod version;

pub use error::{DeployError, Result};
pub use event::{ActionType, EventError, PublishDetail, PublishEvent, PublishResult, SkipReason};
pub use schema::{ParamType, SchemaError, ToolDefinition, ToolParameter, ToolSchema};
pub use version::{agent_name, derive_version, Clock, FixedClock, LabelSource, SystemClock};
