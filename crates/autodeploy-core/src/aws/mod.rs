//! AWS adapters for the provider traits.
//!
//! Requests are signed locally with SigV4 (see [`sigv4`]) and sent with
//! `reqwest`; there is no SDK dependency.
//!
//! # Credentials
//! Read from env vars:
//! - `AWS_ACCESS_KEY_ID`
//! - `AWS_SECRET_ACCESS_KEY`
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//! - `AWS_DEFAULT_REGION` or `AWS_REGION` (fallback: `us-east-1`) when the
//!   configuration does not name a region

pub mod bedrock;
pub mod codebuild;
pub mod ecr;
pub mod lambda;
pub mod sigv4;

pub use bedrock::BedrockAgentApi;
pub use codebuild::CodeBuildRunner;
pub use ecr::EcrRegistry;
pub use lambda::LambdaEndpoint;

use chrono::Utc;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::backends::{ProviderError, ProviderErrorKind, ProviderResult};

pub const JSON_1_1: &str = "application/x-amz-json-1.1";
pub const JSON: &str = "application/json";

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    pub fn from_env() -> ProviderResult<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| ProviderError::fatal("AWS_ACCESS_KEY_ID not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| ProviderError::fatal("AWS_SECRET_ACCESS_KEY not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Region from configuration, falling back to the standard AWS env vars.
pub fn resolve_region(configured: Option<&str>) -> String {
    configured
        .filter(|r| !r.trim().is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok())
        .or_else(|| std::env::var("AWS_REGION").ok())
        .unwrap_or_else(|| "us-east-1".into())
}

/// Signing name and host prefix of one AWS service.
#[derive(Debug, Clone, Copy)]
pub struct Service {
    pub signing_name: &'static str,
    pub host_prefix: &'static str,
}

pub const ECR: Service = Service {
    signing_name: "ecr",
    host_prefix: "api.ecr",
};
pub const LAMBDA: Service = Service {
    signing_name: "lambda",
    host_prefix: "lambda",
};
pub const BEDROCK_AGENT: Service = Service {
    signing_name: "bedrock",
    host_prefix: "bedrock-agent",
};
pub const CODEBUILD: Service = Service {
    signing_name: "codebuild",
    host_prefix: "codebuild",
};

/// Signed JSON client shared by the adapters.
#[derive(Debug, Clone)]
pub struct AwsClient {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
}

impl AwsClient {
    pub fn new(credentials: AwsCredentials, region: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            region: region.into(),
        }
    }

    /// Credentials from the environment; region from `configured` or the
    /// environment.
    pub fn from_env(configured_region: Option<&str>) -> ProviderResult<Self> {
        Ok(Self::new(
            AwsCredentials::from_env()?,
            resolve_region(configured_region),
        ))
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn host(&self, service: Service) -> String {
        format!("{}.{}.amazonaws.com", service.host_prefix, self.region)
    }

    /// AWS JSON 1.1 call (`POST /` with an `X-Amz-Target` header).
    pub async fn json_rpc(
        &self,
        service: Service,
        target: &str,
        body: &Value,
    ) -> ProviderResult<Value> {
        let bytes = serde_json::to_vec(body).map_err(|e| ProviderError::fatal(e.to_string()))?;
        self.send(service, Method::POST, "/", JSON_1_1, Some(target), bytes)
            .await
    }

    /// REST-JSON call. `path` segments must already be encoded.
    pub async fn rest(
        &self,
        service: Service,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ProviderResult<Value> {
        let bytes = match body {
            Some(body) => {
                serde_json::to_vec(body).map_err(|e| ProviderError::fatal(e.to_string()))?
            }
            None => Vec::new(),
        };
        self.send(service, method, path, JSON, None, bytes).await
    }

    async fn send(
        &self,
        service: Service,
        method: Method,
        path: &str,
        content_type: &str,
        target: Option<&str>,
        body: Vec<u8>,
    ) -> ProviderResult<Value> {
        let host = self.host(service);
        let now = Utc::now();
        let date_time = now.format(sigv4::AMZ_DATE_FORMAT).to_string();

        let mut headers: Vec<(&str, &str)> = vec![
            ("content-type", content_type),
            ("host", host.as_str()),
            ("x-amz-date", date_time.as_str()),
        ];
        if let Some(target) = target {
            headers.push(("x-amz-target", target));
        }
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.as_str()));
        }

        let authorization = sigv4::authorization(
            &self.credentials,
            &self.region,
            service.signing_name,
            &sigv4::SigningInput {
                method: method.as_str(),
                path,
                query: &[],
                headers: &headers,
                body: &body,
            },
            now,
        );

        debug!(
            service = service.signing_name,
            method = %method,
            path,
            amz_target = target.unwrap_or(""),
            "sending AWS request"
        );

        let url = format!("https://{}{}", host, path);
        let mut request = self.http.request(method, &url);
        for (name, value) in &headers {
            if *name != "host" {
                request = request.header(*name, *value);
            }
        }
        let response = request
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("request to {} failed: {}", host, e)))?;

        let status = response.status().as_u16();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::transient(format!("reading response failed: {}", e)))?;

        if !(200..300).contains(&status) {
            return Err(error_from_response(status, error_type.as_deref(), &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::fatal(format!("unparseable response: {}", e)))
    }
}

/// Short error code from `x-amzn-ErrorType` or a `__type` field such as
/// `com.amazonaws.ecr#RepositoryNotFoundException` or
/// `ConflictException:http://internal.amazon.com/...`.
fn normalize_error_type(raw: &str) -> &str {
    let raw = raw.rsplit('#').next().unwrap_or(raw);
    raw.split(':').next().unwrap_or(raw)
}

/// Classify a failed response.
pub fn classify(status: u16, error_type: &str) -> ProviderErrorKind {
    let t = error_type.to_ascii_lowercase();
    if status == 429
        || status >= 500
        || t.contains("throttl")
        || t.contains("toomanyrequests")
        || t.contains("serviceunavailable")
    {
        ProviderErrorKind::Transient
    } else if status == 409
        || t.contains("conflict")
        || t.contains("alreadyexists")
        || t.contains("resourceinuse")
    {
        ProviderErrorKind::Conflict
    } else if status == 404 || t.contains("notfound") {
        ProviderErrorKind::NotFound
    } else if status == 400 || t.contains("validation") || t.contains("invalidparameter") {
        ProviderErrorKind::Validation
    } else {
        ProviderErrorKind::Fatal
    }
}

pub(crate) fn error_from_response(
    status: u16,
    header_type: Option<&str>,
    body: &[u8],
) -> ProviderError {
    let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let raw_type = header_type
        .or_else(|| parsed.get("__type").and_then(Value::as_str))
        .or_else(|| parsed.get("code").and_then(Value::as_str))
        .unwrap_or("");
    let error_type = normalize_error_type(raw_type);
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    let label = if error_type.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("{} (HTTP {})", error_type, status)
    };
    ProviderError::new(classify(status, error_type), format!("{}: {}", label, message))
}

/// String field or a fatal "missing field" error.
pub(crate) fn str_field<'a>(value: &'a Value, pointer: &str) -> ProviderResult<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::fatal(format!("response is missing {}", pointer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_status_and_type() {
        assert_eq!(classify(429, ""), ProviderErrorKind::Transient);
        assert_eq!(classify(503, ""), ProviderErrorKind::Transient);
        assert_eq!(classify(400, "ThrottlingException"), ProviderErrorKind::Transient);
        assert_eq!(classify(409, ""), ProviderErrorKind::Conflict);
        assert_eq!(
            classify(400, "ResourceConflictException"),
            ProviderErrorKind::Conflict
        );
        assert_eq!(
            classify(400, "RepositoryNotFoundException"),
            ProviderErrorKind::NotFound
        );
        assert_eq!(classify(404, ""), ProviderErrorKind::NotFound);
        assert_eq!(classify(400, "ValidationException"), ProviderErrorKind::Validation);
        assert_eq!(classify(403, "AccessDeniedException"), ProviderErrorKind::Fatal);
    }

    #[test]
    fn error_type_is_read_from_body() {
        let err = error_from_response(
            400,
            None,
            br#"{"__type":"com.amazonaws.ecr#RepositoryNotFoundException","message":"no repo"}"#,
        );
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
        assert_eq!(err.message, "RepositoryNotFoundException (HTTP 400): no repo");
    }

    #[test]
    fn error_type_header_wins() {
        let err = error_from_response(
            409,
            Some("ConflictException:http://internal.amazon.com/coral/"),
            br#"{"message":"Could not perform CreateAgent"}"#,
        );
        assert_eq!(err.kind, ProviderErrorKind::Conflict);
        assert!(err.message.starts_with("ConflictException (HTTP 409)"));
    }

    #[test]
    fn non_json_error_body_is_kept() {
        let err = error_from_response(502, None, b"Bad Gateway");
        assert!(err.is_transient());
        assert_eq!(err.message, "HTTP 502: Bad Gateway");
    }

    #[test]
    fn configured_region_wins() {
        assert_eq!(resolve_region(Some("eu-west-1")), "eu-west-1");
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = AwsCredentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("\"secret\""));
        assert!(!rendered.contains("\"token\""));
    }
}
