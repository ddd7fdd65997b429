//! Container registry adapter (`DescribeImages`).

use async_trait::async_trait;
use autodeploy_state::{ArtifactRef, ImageDigest};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{AwsClient, ECR};
use crate::backends::{ImageRegistry, ProviderError, ProviderResult};

const DESCRIBE_IMAGES: &str = "AmazonEC2ContainerRegistry_V20150921.DescribeImages";
const PAGE_SIZE: u32 = 100;

pub struct EcrRegistry {
    client: AwsClient,
}

impl EcrRegistry {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn list_images(&self, repository: &str) -> ProviderResult<Vec<ArtifactRef>> {
        let mut images = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({
                "repositoryName": repository,
                "maxResults": PAGE_SIZE,
            });
            if let Some(token) = &next_token {
                body["nextToken"] = json!(token);
            }

            let page = self.client.json_rpc(ECR, DESCRIBE_IMAGES, &body).await?;
            images.extend(parse_images(repository, &page)?);

            next_token = page
                .get("nextToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(images)
    }
}

/// Parse one `DescribeImages` page.
pub(crate) fn parse_images(repository: &str, page: &Value) -> ProviderResult<Vec<ArtifactRef>> {
    let Some(details) = page.get("imageDetails").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    details
        .iter()
        .map(|detail| {
            let digest = detail
                .get("imageDigest")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::fatal("image detail without imageDigest"))?;
            let digest =
                ImageDigest::parse(digest).map_err(|e| ProviderError::fatal(e.to_string()))?;
            let pushed_at = detail
                .get("imagePushedAt")
                .and_then(Value::as_f64)
                .and_then(epoch_seconds)
                .ok_or_else(|| {
                    ProviderError::fatal(format!("image {} has no push time", digest))
                })?;
            let tags = detail
                .get("imageTags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let registry_id = detail
                .get("registryId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            Ok(ArtifactRef {
                repository: detail
                    .get("repositoryName")
                    .and_then(Value::as_str)
                    .unwrap_or(repository)
                    .to_string(),
                registry_id,
                digest,
                tags,
                pushed_at,
            })
        })
        .collect()
}

/// Registry timestamps are fractional epoch seconds.
fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
