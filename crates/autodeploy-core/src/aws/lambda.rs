//! Tool-execution endpoint backed by a container-image function.

use async_trait::async_trait;
use autodeploy_state::{ArtifactRef, EndpointRef, ImageDigest};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use super::sigv4::encode_component;
use super::{str_field, AwsClient, LAMBDA};
use crate::backends::{EndpointStatus, ProviderResult, ToolEndpoint};

const API_VERSION: &str = "2015-03-31";

pub struct LambdaEndpoint {
    client: AwsClient,
    /// Function name or ARN.
    function: String,
}

impl LambdaEndpoint {
    pub fn new(client: AwsClient, function: impl Into<String>) -> Self {
        Self {
            client,
            function: function.into(),
        }
    }

    fn path(&self, suffix: &str) -> String {
        format!(
            "/{}/functions/{}{}",
            API_VERSION,
            encode_component(&self.function),
            suffix
        )
    }
}

#[async_trait]
impl ToolEndpoint for LambdaEndpoint {
    async fn apply_image(&self, artifact: &ArtifactRef) -> ProviderResult<EndpointRef> {
        let image_uri = artifact.image_uri(self.client.region());
        let body = json!({ "ImageUri": image_uri, "Publish": false });
        let config = self
            .client
            .rest(LAMBDA, Method::PUT, &self.path("/code"), Some(&body))
            .await?;

        let target = config
            .get("FunctionArn")
            .and_then(Value::as_str)
            .unwrap_or(self.function.as_str())
            .to_string();
        debug!(function = %target, image_uri = %image_uri, "function code updated");

        Ok(EndpointRef {
            target,
            image_uri,
            digest: artifact.digest.clone(),
        })
    }

    async fn status(&self) -> ProviderResult<EndpointStatus> {
        let config = self
            .client
            .rest(LAMBDA, Method::GET, &self.path("/configuration"), None)
            .await?;
        Ok(parse_update_status(&config))
    }

    async fn current_image(&self) -> ProviderResult<Option<EndpointRef>> {
        let function = self
            .client
            .rest(LAMBDA, Method::GET, &self.path(""), None)
            .await?;
        parse_current_image(&function)
    }
}

/// Map `State` / `LastUpdateStatus` of a function configuration.
pub(crate) fn parse_update_status(config: &Value) -> EndpointStatus {
    let reason = |key: &str| {
        config
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string()
    };

    match config.get("State").and_then(Value::as_str) {
        Some("Failed") => return EndpointStatus::Failed(reason("StateReason")),
        Some("Pending") => return EndpointStatus::Updating,
        _ => {}
    }
    match config.get("LastUpdateStatus").and_then(Value::as_str) {
        Some("InProgress") => EndpointStatus::Updating,
        Some("Failed") => EndpointStatus::Failed(reason("LastUpdateStatusReason")),
        _ => EndpointStatus::Ready,
    }
}

/// Digest-pinned image of a `GetFunction` response, if any.
pub(crate) fn parse_current_image(function: &Value) -> ProviderResult<Option<EndpointRef>> {
    let image_uri = function
        .pointer("/Code/ResolvedImageUri")
        .or_else(|| function.pointer("/Code/ImageUri"))
        .and_then(Value::as_str);
    let Some(image_uri) = image_uri else {
        return Ok(None);
    };
    let Some(digest) = digest_from_uri(image_uri) else {
        return Ok(None);
    };
    let target = str_field(function, "/Configuration/FunctionArn")?;
    Ok(Some(EndpointRef {
        target: target.to_string(),
        image_uri: image_uri.to_string(),
        digest,
    }))
}

fn digest_from_uri(uri: &str) -> Option<ImageDigest> {
    let (_, digest) = uri.rsplit_once('@')?;
    ImageDigest::parse(digest).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_status_mapping() {
        assert_eq!(
            parse_update_status(&json!({"State": "Active", "LastUpdateStatus": "Successful"})),
            EndpointStatus::Ready
        );
        assert_eq!(
            parse_update_status(&json!({"State": "Active", "LastUpdateStatus": "InProgress"})),
            EndpointStatus::Updating
        );
        assert_eq!(
            parse_update_status(&json!({"State": "Pending"})),
            EndpointStatus::Updating
        );
        assert_eq!(
            parse_update_status(&json!({
                "LastUpdateStatus": "Failed",
                "LastUpdateStatusReason": "image not found"
            })),
            EndpointStatus::Failed("image not found".to_string())
        );
    }

    #[test]
    fn current_image_prefers_resolved_uri() {
        let function = json!({
            "Configuration": {
                "FunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:AgentCoreToolExecutor"
            },
            "Code": {
                "ImageUri": "123456789012.dkr.ecr.us-east-1.amazonaws.com/agent-core-tools:latest",
                "ResolvedImageUri": "123456789012.dkr.ecr.us-east-1.amazonaws.com/agent-core-tools@sha256:abc123"
            }
        });
        let current = parse_current_image(&function).unwrap().unwrap();
        assert_eq!(current.digest.as_str(), "sha256:abc123");
        assert!(current.target.ends_with(":function:AgentCoreToolExecutor"));
    }

    #[test]
    fn tag_only_image_has_no_digest() {
        let function = json!({
            "Configuration": {"FunctionArn": "arn:aws:lambda:us-east-1:1:function:F"},
            "Code": {"ImageUri": "1.dkr.ecr.us-east-1.amazonaws.com/repo:latest"}
        });
        assert!(parse_current_image(&function).unwrap().is_none());
        assert!(parse_current_image(&json!({})).unwrap().is_none());
    }

    #[test]
    fn function_arn_is_encoded_in_path() {
        let client = AwsClient::new(
            crate::aws::AwsCredentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            },
            "us-east-1",
        );
        let endpoint = LambdaEndpoint::new(client, "arn:aws:lambda:us-east-1:1:function:F");
        assert_eq!(
            endpoint.path("/code"),
            "/2015-03-31/functions/arn%3Aaws%3Alambda%3Aus-east-1%3A1%3Afunction%3AF/code"
        );
    }
}
