//! AWS Signature Version 4 for S3 requests.
//!
//! Signs `host`, `x-amz-content-sha256` and `x-amz-date`. Payloads are always
//! hashed (no `UNSIGNED-PAYLOAD`).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Service name for S3
pub const SERVICE_S3: &str = "s3";

/// Credentials and scope for one signer.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Hex SHA-256 of a payload.
#[must_use]
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Derive the signing key for `date` (`YYYYMMDD`).
#[must_use]
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// `host[:port]` exactly as the HTTP client will send it.
#[must_use]
pub fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Percent-encode one path segment or query component.
#[must_use]
pub fn uri_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the canonical request string.
#[must_use]
pub fn canonical_request(method: &str, url: &Url, amz_date: &str, content_sha256: &str) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    format!(
        "{method}\n{path}\n{query}\nhost:{host}\nx-amz-content-sha256:{content_sha256}\nx-amz-date:{amz_date}\n\nhost;x-amz-content-sha256;x-amz-date\n{content_sha256}",
        query = canonical_query(url),
        host = host_header(url),
    )
}

/// Sign a request made at `now`.
#[must_use]
pub fn sign(
    credentials: Credentials<'_>,
    method: &str,
    url: &Url,
    body: &[u8],
    now: DateTime<Utc>,
) -> SignedHeaders {
    assert!(!credentials.access_key_id.is_empty(), "access key id cannot be empty");
    assert!(!credentials.region.is_empty(), "region cannot be empty");

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let content_sha256 = payload_hash(body);

    let canonical = canonical_request(method, url, &amz_date, &content_sha256);
    let scope = format!("{date}/{}/{SERVICE_S3}/aws4_request", credentials.region);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    );

    let key = signing_key(
        credentials.secret_access_key,
        &date,
        credentials.region,
        SERVICE_S3,
    );
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    SignedHeaders {
        authorization: format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}",
            credentials.access_key_id
        ),
        amz_date,
        content_sha256,
    }
}
