//! agent-autodeploy core library
//!
//! Turns image-publish events into versioned, prepared agents bound to a
//! shared tool-execution endpoint, and drives the build-and-wait client.

pub mod aws;
pub mod backends;
pub mod client;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod provisioning;
pub mod retry;
pub mod telemetry;

pub use backends::{
    newest_artifact, ActionGroupSpec, AgentApi, AgentDraft, AgentId, AgentStatus, AgentSummary,
    BuildId, BuildRunner, BuildStatus, EndpointStatus, ImageRegistry, ProviderError,
    ProviderErrorKind, ProviderResult, ToolEndpoint,
};

pub use client::{DeployOutcome, DeployReport, DeploymentClient, Phase, PhaseTiming};

pub use config::{ConfigError, DeployConfig, Policies};

pub use domain::{
    agent_name, derive_version, Clock, DeployError, EventError, FixedClock, LabelSource,
    ParamType, PublishEvent, Result, SchemaError, SkipReason, SystemClock, ToolDefinition,
    ToolParameter, ToolSchema,
};

pub use orchestrator::{HandleOutcome, Orchestrator};

pub use provisioning::{ProvisioningMachine, ProvisioningState, Transition};

pub use retry::{poll_until, retry_transient, PollError, PollStatus, RetryPolicy};

pub use autodeploy_state::{
    ArtifactRef, DeploymentId, DeploymentRecord, DeploymentState, DeploymentStore,
    EndpointLedger, EndpointRecord, EndpointRef, FailureInfo, FailureKind, ImageDigest,
    SurrealDeploymentStore, SurrealHandle, VersionLabel,
};
