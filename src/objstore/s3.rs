//! S3ObjectStore - S3 over plain HTTP with SigV4.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use url::Url;

use super::sigv4::{self, Credentials};
use super::{validate_key, ObjectError, ObjectResult, ObjectStore};
use crate::clock::Clock;

/// Region where `CreateBucket` must omit the location constraint
const REGION_US_EAST_1: &str = "us-east-1";

/// Maximum bytes of an error body kept in `ObjectError::Status`
const ERROR_BODY_BYTES_MAX: usize = 1_024;

/// Connection settings for an S3-compatible service.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (path-style addressing), e.g. a local MinIO
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Object store backed by an S3 bucket.
pub struct S3ObjectStore {
    config: S3Config,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(config: S3Config, clock: Arc<dyn Clock>) -> Self {
        assert!(!config.bucket.is_empty(), "bucket cannot be empty");
        Self {
            config,
            client: reqwest::Client::new(),
            clock,
        }
    }

    /// URL of the bucket (`key == None`) or of an object.
    fn url(&self, key: Option<&str>) -> ObjectResult<Url> {
        let encoded_key = key
            .map(|k| {
                k.split('/')
                    .map(sigv4::uri_encode)
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();

        let raw = match &self.config.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                sigv4::uri_encode(&self.config.bucket),
                encoded_key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.config.bucket, self.config.region, encoded_key
            ),
        };

        Url::parse(&raw).map_err(|e| ObjectError::Request(format!("invalid url {raw}: {e}")))
    }

    async fn send(&self, method: Method, url: Url, body: Vec<u8>) -> ObjectResult<reqwest::Response> {
        let credentials = Credentials {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
        };
        let signed = sigv4::sign(credentials, method.as_str(), &url, &body, self.clock.now());

        let response = self
            .client
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header("authorization", signed.authorization)
            .body(body)
            .send()
            .await?;

        Ok(response)
    }
}

async fn status_error(response: reqwest::Response) -> ObjectError {
    let status = response.status().as_u16();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_BYTES_MAX {
        let mut end = ERROR_BODY_BYTES_MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    ObjectError::Status { status, body }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn describe(&self) -> String {
        format!("S3 bucket '{}'", self.config.bucket)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket, key)
    }

    async fn ensure_bucket(&self) -> ObjectResult<bool> {
        let url = self.url(None)?;
        let head = self.send(Method::HEAD, url.clone(), Vec::new()).await?;
        if head.status().is_success() {
            return Ok(false);
        }
        if head.status() != StatusCode::NOT_FOUND {
            return Err(status_error(head).await);
        }

        tracing::info!(bucket = %self.config.bucket, "bucket not found, creating");

        let body = if self.config.region == REGION_US_EAST_1 {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\"><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.config.region
            )
            .into_bytes()
        };

        let created = self.send(Method::PUT, url, body).await?;
        if !created.status().is_success() {
            return Err(status_error(created).await);
        }
        Ok(true)
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> ObjectResult<()> {
        validate_key(key)?;
        let size = body.len();

        let response = self.send(Method::PUT, self.url(Some(key))?, body).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        tracing::debug!(key = %key, bytes = size, "object uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> ObjectResult<Vec<u8>> {
        validate_key(key)?;

        let response = self.send(Method::GET, self.url(Some(key))?, Vec::new()).await?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::NOT_FOUND => Err(ObjectError::NotFound(key.to_string())),
            _ => Err(status_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_bytes, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(endpoint: &str) -> S3ObjectStore {
        let clock = Arc::new(SimClock::at(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()));
        S3ObjectStore::new(
            S3Config {
                access_key_id: "AKIDTEST".to_string(),
                secret_access_key: "secret".to_string(),
                bucket: "arcasys".to_string(),
                region: "ap-southeast-1".to_string(),
                endpoint: Some(endpoint.to_string()),
            },
            clock,
        )
    }

    #[test]
    fn test_virtual_hosted_url() {
        let clock = Arc::new(SimClock::at(Utc::now()));
        let store = S3ObjectStore::new(
            S3Config {
                access_key_id: "a".to_string(),
                secret_access_key: "b".to_string(),
                bucket: "arcasys".to_string(),
                region: "ap-southeast-1".to_string(),
                endpoint: None,
            },
            clock,
        );
        assert_eq!(
            store.url(Some("backups/2025-05-01/db.sql")).unwrap().as_str(),
            "https://arcasys.s3.ap-southeast-1.amazonaws.com/backups/2025-05-01/db.sql"
        );
        assert_eq!(store.location("logs/x.txt"), "s3://arcasys/logs/x.txt");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = S3Config {
            access_key_id: "a".to_string(),
            secret_access_key: "top-secret".to_string(),
            bucket: "b".to_string(),
            region: "r".to_string(),
            endpoint: None,
        };
        assert!(!format!("{config:?}").contains("top-secret"));
    }

    #[tokio::test]
    async fn test_put_signs_and_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/arcasys/backups/2025-05-01/db.sql"))
            .and(header_exists("authorization"))
            .and(header("x-amz-date", "20250501T000000Z"))
            .and(body_bytes(b"INSERT 1;".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server.uri());
        store
            .put("backups/2025-05-01/db.sql", b"INSERT 1;".to_vec())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store(&server.uri()).get("backups/none.sql").await.unwrap_err();
        assert!(matches!(err, ObjectError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ensure_bucket_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/arcasys/"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/arcasys/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        assert!(store(&server.uri()).ensure_bucket().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_bucket_existing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(!store(&server.uri()).ensure_bucket().await.unwrap());
    }
}
