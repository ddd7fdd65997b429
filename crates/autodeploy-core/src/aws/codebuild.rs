//! Image build runner (CodeBuild).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{str_field, AwsClient, CODEBUILD};
use crate::backends::{BuildId, BuildRunner, BuildStatus, ProviderError, ProviderResult};

const START_BUILD: &str = "CodeBuild_20161006.StartBuild";
const BATCH_GET_BUILDS: &str = "CodeBuild_20161006.BatchGetBuilds";

pub struct CodeBuildRunner {
    client: AwsClient,
    project: String,
}

impl CodeBuildRunner {
    pub fn new(client: AwsClient, project: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
        }
    }
}

#[async_trait]
impl BuildRunner for CodeBuildRunner {
    async fn start_build(&self) -> ProviderResult<BuildId> {
        let response = self
            .client
            .json_rpc(CODEBUILD, START_BUILD, &json!({ "projectName": self.project }))
            .await?;
        Ok(BuildId(str_field(&response, "/build/id")?.to_string()))
    }

    async fn build_status(&self, build_id: &BuildId) -> ProviderResult<BuildStatus> {
        let response = self
            .client
            .json_rpc(CODEBUILD, BATCH_GET_BUILDS, &json!({ "ids": [build_id.0] }))
            .await?;
        parse_build_status(build_id, &response)
    }
}

pub(crate) fn parse_build_status(
    build_id: &BuildId,
    response: &Value,
) -> ProviderResult<BuildStatus> {
    let build = response
        .get("builds")
        .and_then(Value::as_array)
        .and_then(|builds| builds.first())
        .ok_or_else(|| ProviderError::not_found(format!("build {} not found", build_id)))?;

    let status = build
        .get("buildStatus")
        .and_then(Value::as_str)
        .unwrap_or("IN_PROGRESS");
    Ok(match status {
        "SUCCEEDED" => BuildStatus::Succeeded,
        "IN_PROGRESS" => BuildStatus::InProgress,
        other => {
            let phase = build
                .get("currentPhase")
                .and_then(Value::as_str)
                .map(|p| format!(" in phase {}", p))
                .unwrap_or_default();
            BuildStatus::Failed(format!("{}{}", other, phase))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> BuildId {
        BuildId("agent-core-builder:0001".to_string())
    }

    #[test]
    fn build_status_mapping() {
        let ok = json!({"builds": [{"id": "x", "buildStatus": "SUCCEEDED"}]});
        assert_eq!(parse_build_status(&id(), &ok).unwrap(), BuildStatus::Succeeded);

        let running = json!({"builds": [{"buildStatus": "IN_PROGRESS"}]});
        assert_eq!(
            parse_build_status(&id(), &running).unwrap(),
            BuildStatus::InProgress
        );

        let failed = json!({"builds": [{"buildStatus": "FAILED", "currentPhase": "BUILD"}]});
        assert_eq!(
            parse_build_status(&id(), &failed).unwrap(),
            BuildStatus::Failed("FAILED in phase BUILD".to_string())
        );

        let timed_out = json!({"builds": [{"buildStatus": "TIMED_OUT"}]});
        assert!(matches!(
            parse_build_status(&id(), &timed_out).unwrap(),
            BuildStatus::Failed(_)
        ));
    }

    #[test]
    fn missing_build_is_not_found() {
        let err = parse_build_status(&id(), &json!({"builds": [], "buildsNotFound": ["x"]}))
            .unwrap_err();
        assert_eq!(err.kind, crate::backends::ProviderErrorKind::NotFound);
    }
}
