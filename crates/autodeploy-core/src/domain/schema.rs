//! Tool capability schema attached to every provisioned agent.
//!
//! The schema is static configuration: an ordered list of tools, each with
//! a description and typed parameters. It is validated once when the
//! configuration is loaded so obviously broken schemas never reach the
//! agent-management API.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter types accepted by the agent-management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required,
        }
    }
}

/// One tool exposed by the action group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

/// Problems found by [`ToolSchema::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("tool schema declares no tools")]
    Empty,

    #[error("tool name must not be empty")]
    EmptyToolName,

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("tool {0} has an empty description")]
    MissingDescription(String),

    #[error("tool {tool} has a parameter with an empty name")]
    EmptyParameterName { tool: String },

    #[error("tool {tool} declares parameter {param} more than once")]
    DuplicateParameter { tool: String, param: String },

    #[error("parameter {tool}.{param} has an empty description")]
    MissingParameterDescription { tool: String, param: String },
}

/// Ordered list of tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSchema {
    pub tools: Vec<ToolDefinition>,
}

impl ToolSchema {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Local sanity checks. Provider-side type checks still apply.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.tools.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen_tools = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(SchemaError::EmptyToolName);
            }
            if !seen_tools.insert(tool.name.as_str()) {
                return Err(SchemaError::DuplicateTool(tool.name.clone()));
            }
            if tool.description.trim().is_empty() {
                return Err(SchemaError::MissingDescription(tool.name.clone()));
            }

            let mut seen_params = HashSet::new();
            for param in &tool.parameters {
                if param.name.trim().is_empty() {
                    return Err(SchemaError::EmptyParameterName {
                        tool: tool.name.clone(),
                    });
                }
                if !seen_params.insert(param.name.as_str()) {
                    return Err(SchemaError::DuplicateParameter {
                        tool: tool.name.clone(),
                        param: param.name.clone(),
                    });
                }
                if param.description.trim().is_empty() {
                    return Err(SchemaError::MissingParameterDescription {
                        tool: tool.name.clone(),
                        param: param.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for ToolSchema {
    /// The tools shipped in the default tool-executor image.
    fn default() -> Self {
        ToolSchema::new(vec![
            ToolDefinition {
                name: "get_weather".to_string(),
                description: "Get current weather for a city".to_string(),
                parameters: vec![ToolParameter::new(
                    "city",
                    ParamType::String,
                    "City name",
                    true,
                )],
            },
            ToolDefinition {
                name: "calculate".to_string(),
                description: "Add two numbers".to_string(),
                parameters: vec![
                    ToolParameter::new("a", ParamType::Number, "First number", true),
                    ToolParameter::new("b", ParamType::Number, "Second number", true),
                ],
            },
            ToolDefinition {
                name: "get_time".to_string(),
                description: "Get the current time in a timezone".to_string(),
                parameters: vec![ToolParameter::new(
                    "timezone",
                    ParamType::String,
                    "IANA timezone name, defaults to UTC",
                    false,
                )],
            },
        ])
    }
}
