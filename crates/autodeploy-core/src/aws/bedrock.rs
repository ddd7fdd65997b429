//! Agent-management adapter (Bedrock Agents control plane).
//!
//! Every agent gets one action group on its `DRAFT` version whose executor
//! is the tool-execution function; tools are declared as a function schema.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::sigv4::{encode_component, hex_sha256};
use super::{str_field, AwsClient, BEDROCK_AGENT};
use crate::backends::{
    ActionGroupSpec, AgentApi, AgentDraft, AgentId, AgentStatus, AgentSummary, ProviderResult,
};
use crate::domain::ToolSchema;

const DRAFT: &str = "DRAFT";
const PAGE_SIZE: u32 = 100;
const IDLE_SESSION_TTL_SECS: u32 = 1800;

pub struct BedrockAgentApi {
    client: AwsClient,
}

impl BedrockAgentApi {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    fn agent_path(agent_id: &AgentId) -> String {
        format!("/agents/{}/", encode_component(&agent_id.0))
    }

    fn action_groups_path(agent_id: &AgentId) -> String {
        format!(
            "/agents/{}/agentversions/{}/actiongroups/",
            encode_component(&agent_id.0),
            DRAFT
        )
    }
}

/// Idempotency token for `CreateAgent`. Derived from the agent name so a
/// retried create with the same name is deduplicated by the provider.
pub fn client_token(agent_name: &str) -> String {
    hex_sha256(agent_name.as_bytes())
}

#[async_trait]
impl AgentApi for BedrockAgentApi {
    async fn create_agent(&self, draft: &AgentDraft) -> ProviderResult<AgentId> {
        let body = json!({
            "agentName": draft.name,
            "agentResourceRoleArn": draft.role_arn,
            "foundationModel": draft.foundation_model,
            "instruction": draft.instruction,
            "idleSessionTTLInSeconds": IDLE_SESSION_TTL_SECS,
            "clientToken": client_token(&draft.name),
        });
        let response = self
            .client
            .rest(BEDROCK_AGENT, Method::PUT, "/agents/", Some(&body))
            .await?;
        let id = str_field(&response, "/agent/agentId")?;
        debug!(agent_id = id, agent_name = %draft.name, "CreateAgent accepted");
        Ok(AgentId(id.to_string()))
    }

    async fn find_agent_by_name(&self, name: &str) -> ProviderResult<Option<AgentSummary>> {
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "maxResults": PAGE_SIZE });
            if let Some(token) = &next_token {
                body["nextToken"] = json!(token);
            }
            let page = self
                .client
                .rest(BEDROCK_AGENT, Method::POST, "/agents/", Some(&body))
                .await?;

            if let Some(found) = parse_agent_summaries(&page)
                .into_iter()
                .find(|summary| summary.name == name)
            {
                return Ok(Some(found));
            }

            next_token = page
                .get("nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }

    async fn get_status(&self, agent_id: &AgentId) -> ProviderResult<AgentStatus> {
        let response = self
            .client
            .rest(BEDROCK_AGENT, Method::GET, &Self::agent_path(agent_id), None)
            .await?;
        let status = str_field(&response, "/agent/agentStatus")?;
        let reasons = response
            .pointer("/agent/failureReasons")
            .and_then(Value::as_array)
            .map(|reasons| {
                reasons
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default();
        Ok(parse_agent_status(status, &reasons))
    }

    async fn list_action_groups(&self, agent_id: &AgentId) -> ProviderResult<Vec<String>> {
        let path = Self::action_groups_path(agent_id);
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "maxResults": PAGE_SIZE });
            if let Some(token) = &next_token {
                body["nextToken"] = json!(token);
            }
            let page = self
                .client
                .rest(BEDROCK_AGENT, Method::POST, &path, Some(&body))
                .await?;
            if let Some(summaries) = page.get("actionGroupSummaries").and_then(Value::as_array) {
                names.extend(
                    summaries
                        .iter()
                        .filter_map(|s| s.get("actionGroupName").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
            next_token = page
                .get("nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(names);
            }
        }
    }

    async fn attach_action_group(
        &self,
        agent_id: &AgentId,
        spec: &ActionGroupSpec,
    ) -> ProviderResult<()> {
        let body = action_group_body(spec);
        self.client
            .rest(
                BEDROCK_AGENT,
                Method::PUT,
                &Self::action_groups_path(agent_id),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn prepare(&self, agent_id: &AgentId) -> ProviderResult<()> {
        self.client
            .rest(BEDROCK_AGENT, Method::POST, &Self::agent_path(agent_id), None)
            .await?;
        Ok(())
    }
}

pub(crate) fn parse_agent_status(status: &str, reasons: &str) -> AgentStatus {
    match status {
        "CREATING" => AgentStatus::Creating,
        "PREPARING" => AgentStatus::Preparing,
        "PREPARED" => AgentStatus::Prepared,
        "NOT_PREPARED" => AgentStatus::NotPrepared,
        "UPDATING" | "VERSIONING" => AgentStatus::Updating,
        "FAILED" | "DELETING" => {
            let reason = if reasons.is_empty() {
                status.to_string()
            } else {
                format!("{}: {}", status, reasons)
            };
            AgentStatus::Failed(reason)
        }
        other => AgentStatus::Failed(format!("unknown agent status {}", other)),
    }
}

pub(crate) fn parse_agent_summaries(page: &Value) -> Vec<AgentSummary> {
    page.get("agentSummaries")
        .and_then(Value::as_array)
        .map(|summaries| {
            summaries
                .iter()
                .filter_map(|s| {
                    let id = s.get("agentId")?.as_str()?;
                    let name = s.get("agentName")?.as_str()?;
                    let status = s.get("agentStatus").and_then(Value::as_str).unwrap_or("");
                    Some(AgentSummary {
                        id: AgentId(id.to_string()),
                        name: name.to_string(),
                        status: parse_agent_status(status, ""),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `CreateAgentActionGroup` request body.
pub(crate) fn action_group_body(spec: &ActionGroupSpec) -> Value {
    json!({
        "actionGroupName": spec.name,
        "actionGroupExecutor": { "lambda": spec.executor_target },
        "actionGroupState": "ENABLED",
        "functionSchema": function_schema(&spec.schema),
    })
}

/// Tool schema in the provider's function-schema shape.
pub fn function_schema(schema: &ToolSchema) -> Value {
    let functions: Vec<Value> = schema
        .tools
        .iter()
        .map(|tool| {
            let mut parameters = Map::new();
            for param in &tool.parameters {
                parameters.insert(
                    param.name.clone(),
                    json!({
                        "type": param.param_type.as_str(),
                        "description": param.description,
                        "required": param.required,
                    }),
                );
            }
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": parameters,
            })
        })
        .collect();
    json!({ "functions": functions })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tools_render_as_function_schema() {
        let schema = function_schema(&ToolSchema::default());
        let functions = schema["functions"].as_array().unwrap();
        assert_eq!(functions.len(), 3);

        assert_eq!(functions[0]["name"], "get_weather");
        assert_eq!(
            functions[0]["parameters"]["city"],
            json!({"type": "string", "description": "City name", "required": true})
        );
        assert_eq!(functions[1]["parameters"]["a"]["type"], "number");
        assert_eq!(functions[2]["parameters"]["timezone"]["required"], false);
    }

    #[test]
    fn action_group_targets_endpoint() {
        let spec = ActionGroupSpec {
            name: "core-tools".to_string(),
            executor_target: "arn:aws:lambda:us-east-1:123456789012:function:Tools".to_string(),
            schema: ToolSchema::default(),
        };
        let body = action_group_body(&spec);
        assert_eq!(body["actionGroupName"], "core-tools");
        assert_eq!(
            body["actionGroupExecutor"]["lambda"],
            "arn:aws:lambda:us-east-1:123456789012:function:Tools"
        );
        assert!(body["functionSchema"]["functions"].is_array());
    }

    #[test]
    fn agent_status_mapping() {
        assert_eq!(parse_agent_status("CREATING", ""), AgentStatus::Creating);
        assert_eq!(parse_agent_status("NOT_PREPARED", ""), AgentStatus::NotPrepared);
        assert_eq!(parse_agent_status("VERSIONING", ""), AgentStatus::Updating);
        assert_eq!(
            parse_agent_status("FAILED", "role not assumable"),
            AgentStatus::Failed("FAILED: role not assumable".to_string())
        );
    }

    #[test]
    fn summaries_skip_incomplete_entries() {
        let page = json!({
            "agentSummaries": [
                {"agentId": "A1", "agentName": "agent-core-20240305-070809", "agentStatus": "PREPARED"},
                {"agentName": "missing-id"}
            ]
        });
        let summaries = parse_agent_summaries(&page);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, AgentId("A1".to_string()));
        assert_eq!(summaries[0].status, AgentStatus::Prepared);
    }

    #[test]
    fn client_token_is_stable_per_name() {
        let a = client_token("agent-core-20240305-070809");
        assert_eq!(a, client_token("agent-core-20240305-070809"));
        assert_ne!(a, client_token("agent-core-20240305-070810"));
        assert_eq!(a.len(), 64);
    }
}
