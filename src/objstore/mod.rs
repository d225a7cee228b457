//! Object Store - Backup Artifact Storage
//!
//! TigerStyle: One trait, explicit key layout, no hidden retries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ObjectStore Trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!        ↑                      ↑                       ↑
//! ┌──────┴───────┐     ┌────────┴───────┐     ┌─────────┴──────────┐
//! │S3ObjectStore │     │ FsObjectStore  │     │UnconfiguredObject- │
//! │ (SigV4/HTTP) │     │ (dev, tests)   │     │Store (always fails)│
//! └──────────────┘     └────────────────┘     └────────────────────┘
//! ```
//!
//! Keys are `{folder}/{YYYY-MM-DD}/{filename}`.

mod fs;
mod s3;
pub mod sigv4;

use async_trait::async_trait;
use chrono::NaiveDate;

pub use fs::FsObjectStore;
pub use s3::{S3Config, S3ObjectStore};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Folder for SQL dumps
pub const BACKUPS_FOLDER: &str = "backups";

/// Folder for backup run logs
pub const LOGS_FOLDER: &str = "logs";

/// Maximum object key length in bytes
pub const OBJECT_KEY_BYTES_MAX: usize = 1_024;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("Missing AWS credentials or bucket name.")]
    MissingCredentials,

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ObjectError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;

// =============================================================================
// Trait
// =============================================================================

/// Bucket-like storage for dumps and logs.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Human-readable destination, e.g. `S3 bucket 'arcasys'`.
    fn describe(&self) -> String;

    /// Fully qualified location of a key, e.g. `s3://arcasys/backups/...`.
    fn location(&self, key: &str) -> String;

    /// Create the bucket if it does not exist. Returns `true` if created.
    async fn ensure_bucket(&self) -> ObjectResult<bool>;

    async fn put(&self, key: &str, body: Vec<u8>) -> ObjectResult<()>;

    /// `NotFound` if the key does not exist.
    async fn get(&self, key: &str) -> ObjectResult<Vec<u8>>;
}

/// `{folder}/{YYYY-MM-DD}/{filename}`
#[must_use]
pub fn object_key(folder: &str, date: NaiveDate, filename: &str) -> String {
    assert!(!folder.is_empty(), "folder cannot be empty");
    assert!(!filename.is_empty(), "filename cannot be empty");
    assert!(!filename.contains('/'), "filename cannot contain '/'");

    format!("{folder}/{}/{filename}", date.format("%Y-%m-%d"))
}

/// Reject keys that could escape a bucket or a root directory.
pub fn validate_key(key: &str) -> ObjectResult<()> {
    if key.is_empty()
        || key.len() > OBJECT_KEY_BYTES_MAX
        || key.starts_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(ObjectError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Last path segment of a key.
#[must_use]
pub fn key_filename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

// =============================================================================
// UnconfiguredObjectStore
// =============================================================================

/// Stand-in when credentials or bucket are missing; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredObjectStore;

#[async_trait]
impl ObjectStore for UnconfiguredObjectStore {
    fn describe(&self) -> String {
        "unconfigured object store".to_string()
    }

    fn location(&self, key: &str) -> String {
        key.to_string()
    }

    async fn ensure_bucket(&self) -> ObjectResult<bool> {
        Err(ObjectError::MissingCredentials)
    }

    async fn put(&self, _key: &str, _body: Vec<u8>) -> ObjectResult<()> {
        Err(ObjectError::MissingCredentials)
    }

    async fn get(&self, _key: &str) -> ObjectResult<Vec<u8>> {
        Err(ObjectError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            object_key(BACKUPS_FOLDER, date, "db_backup_20250307_101500.sql"),
            "backups/2025-03-07/db_backup_20250307_101500.sql"
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("logs/2025-03-07/backup_log.txt").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/key").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_key_filename() {
        assert_eq!(key_filename("backups/2025-03-07/db.sql"), "db.sql");
        assert_eq!(key_filename("db.sql"), "db.sql");
    }

    #[tokio::test]
    async fn test_unconfigured_store_fails() {
        let store = UnconfiguredObjectStore;
        let err = store.put("backups/x/y.sql", vec![1]).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing AWS credentials or bucket name.");
    }
}
