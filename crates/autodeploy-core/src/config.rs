//! Deployment configuration.
//!
//! Loaded from an optional TOML file, then overridden by `AUTODEPLOY_*`
//! environment variables. Every option has a default except the agent role
//! ARN, which [`DeployConfig::validate`] requires.
//!
//! ```toml
//! repository = "agent-core-tools"
//! region = "us-east-1"
//! agent_role_arn = "arn:aws:iam::123456789012:role/AgentCoreAutoDeployRole"
//!
//! [policies.preparation]
//! interval_ms = 2000
//! multiplier = 1.5
//! max_interval_ms = 15000
//! max_wait_ms = 300000
//!
//! [[tools]]
//! name = "get_weather"
//! description = "Get current weather for a city"
//! [[tools.parameters]]
//! name = "city"
//! type = "string"
//! description = "City name"
//! required = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{LabelSource, SchemaError, ToolSchema};
use crate::retry::RetryPolicy;

pub const ENV_REPOSITORY: &str = "AUTODEPLOY_REPOSITORY";
pub const ENV_REGION: &str = "AUTODEPLOY_REGION";
pub const ENV_ENDPOINT_FUNCTION: &str = "AUTODEPLOY_ENDPOINT_FUNCTION";
pub const ENV_AGENT_ROLE_ARN: &str = "AUTODEPLOY_AGENT_ROLE_ARN";
pub const ENV_FOUNDATION_MODEL: &str = "AUTODEPLOY_FOUNDATION_MODEL";
pub const ENV_BUILD_PROJECT: &str = "AUTODEPLOY_BUILD_PROJECT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse config file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("configuration validation failed: {0}")]
    Validation(String),

    #[error("invalid tool schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Per-call-site wait policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    /// Registry lookups (read-only, transient errors only).
    pub registry: RetryPolicy,
    /// Endpoint rollout after an image change.
    pub endpoint_ready: RetryPolicy,
    /// New agent leaving the `Creating` status.
    pub agent_settle: RetryPolicy,
    /// Finding an agent by name after a creation conflict.
    pub adopt: RetryPolicy,
    /// Agent preparation.
    pub preparation: RetryPolicy,
    /// Build completion (deployment client).
    pub build: RetryPolicy,
    /// Endpoint reflecting the new image (deployment client).
    pub endpoint_reflect: RetryPolicy,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            registry: RetryPolicy::exponential(500, 2.0, 5_000, 30_000).with_max_attempts(5),
            endpoint_ready: RetryPolicy::fixed(2_000, 120_000),
            agent_settle: RetryPolicy::fixed(2_000, 60_000),
            adopt: RetryPolicy::exponential(1_000, 2.0, 8_000, 30_000),
            preparation: RetryPolicy::exponential(2_000, 1.5, 15_000, 300_000),
            build: RetryPolicy::fixed(15_000, 1_800_000),
            endpoint_reflect: RetryPolicy::fixed(10_000, 600_000),
        }
    }
}

impl Policies {
    fn all(&self) -> [(&'static str, &RetryPolicy); 7] {
        [
            ("registry", &self.registry),
            ("endpoint_ready", &self.endpoint_ready),
            ("agent_settle", &self.agent_settle),
            ("adopt", &self.adopt),
            ("preparation", &self.preparation),
            ("build", &self.build),
            ("endpoint_reflect", &self.endpoint_reflect),
        ]
    }
}

/// Everything the orchestrator and deployment client need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Registry repository whose pushes trigger deployments.
    pub repository: String,
    pub region: String,
    /// Tool-execution function name (or ARN).
    pub endpoint_function: String,
    /// IAM role assumed by created agents.
    pub agent_role_arn: String,
    pub foundation_model: String,
    pub instruction: String,
    pub agent_name_prefix: String,
    pub action_group_name: String,
    /// Build project started by the deployment client.
    pub build_project: String,
    pub label_source: LabelSource,
    pub policies: Policies,
    pub tools: ToolSchema,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repository: "agent-core-tools".to_string(),
            region: "us-east-1".to_string(),
            endpoint_function: "AgentCoreToolExecutor".to_string(),
            agent_role_arn: String::new(),
            foundation_model: "anthropic.claude-3-sonnet-20240229-v1:0".to_string(),
            instruction:
                "You are a helpful assistant with custom tools for weather, calculations, and more."
                    .to_string(),
            agent_name_prefix: "agent-core-".to_string(),
            action_group_name: "core-tools".to_string(),
            build_project: "agent-core-builder".to_string(),
            label_source: LabelSource::default(),
            policies: Policies::default(),
            tools: ToolSchema::default(),
        }
    }
}

impl DeployConfig {
    /// Load from `path` (when given) and apply environment overrides.
    ///
    /// Does not validate; call [`DeployConfig::validate`] before deploying.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = read(ENV_REPOSITORY) {
            self.repository = value;
        }
        if let Some(value) = read(ENV_REGION) {
            self.region = value;
        }
        if let Some(value) = read(ENV_ENDPOINT_FUNCTION) {
            self.endpoint_function = value;
        }
        if let Some(value) = read(ENV_AGENT_ROLE_ARN) {
            self.agent_role_arn = value;
        }
        if let Some(value) = read(ENV_FOUNDATION_MODEL) {
            self.foundation_model = value;
        }
        if let Some(value) = read(ENV_BUILD_PROJECT) {
            self.build_project = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("repository", &self.repository),
            ("region", &self.region),
            ("endpoint_function", &self.endpoint_function),
            ("agent_role_arn", &self.agent_role_arn),
            ("foundation_model", &self.foundation_model),
            ("instruction", &self.instruction),
            ("action_group_name", &self.action_group_name),
            ("build_project", &self.build_project),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("`{}` must be set", name)));
            }
        }

        for (name, policy) in self.policies.all() {
            policy
                .validate()
                .map_err(|msg| ConfigError::Validation(format!("policies.{}: {}", name, msg)))?;
        }

        self.tools.validate()?;
        Ok(())
    }

    /// Render as TOML (used by `config show`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Validation(e.to_string()))
    }
}
