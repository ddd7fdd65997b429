//! AWS Signature Version 4.
//!
//! Request hashing uses `sha2`, key derivation and the final signature use
//! `hmac`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::AwsCredentials;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().to_vec()
}

pub(crate) fn hex_sha256(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn derive_signing_key(secret: &[u8], date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_secret = [b"AWS4", secret].concat();
    let k_date = hmac_sha256(&k_secret, date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Percent-encode everything except unreserved characters and `/`.
pub(crate) fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Percent-encode a single path segment or query component (`/` included).
pub(crate) fn encode_component(s: &str) -> String {
    urlencoded(s).replace('/', "%2F")
}

/// Request parts that take part in the signature.
#[derive(Debug, Clone)]
pub struct SigningInput<'a> {
    pub method: &'a str,
    /// Path as sent on the wire (segments already encoded once).
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    /// Headers to sign, `host` and `x-amz-date` included.
    pub headers: &'a [(&'a str, &'a str)],
    pub body: &'a [u8],
}

/// Compute the `Authorization` header value.
pub fn authorization(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    input: &SigningInput<'_>,
    now: DateTime<Utc>,
) -> String {
    let date_time = now.format(AMZ_DATE_FORMAT).to_string();
    let date = &date_time[..8];

    let mut headers: Vec<(String, String)> = input
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let mut query: Vec<(String, String)> = input
        .query
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    // Non-S3 services sign the path encoded a second time.
    let canonical_path = if input.path.is_empty() {
        "/".to_string()
    } else {
        urlencoded(input.path)
    };

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        canonical_path,
        canonical_query,
        canonical_headers,
        signed_headers,
        hex_sha256(input.body)
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        date_time,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        credentials.secret_access_key.as_bytes(),
        date,
        region,
        service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "{} Credential={}/{},SignedHeaders={},Signature={}",
        ALGORITHM, credentials.access_key_id, credential_scope, signed_headers, signature
    )
}
