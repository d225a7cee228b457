//! FsObjectStore - directory-backed object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{validate_key, ObjectError, ObjectResult, ObjectStore};

/// Stores each key as a file under `root`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> ObjectResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn describe(&self) -> String {
        format!("directory '{}'", self.root.display())
    }

    fn location(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }

    async fn ensure_bucket(&self) -> ObjectResult<bool> {
        if tokio::fs::try_exists(&self.root).await? {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(true)
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> ObjectResult<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ObjectResult<Vec<u8>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("bucket"));

        assert!(store.ensure_bucket().await.unwrap());
        assert!(!store.ensure_bucket().await.unwrap());

        store.put("logs/2025-01-01/log.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("logs/2025-01-01/log.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_and_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        assert!(matches!(
            store.get("backups/none.sql").await,
            Err(ObjectError::NotFound(_))
        ));
        assert!(matches!(
            store.put("../outside.sql", vec![]).await,
            Err(ObjectError::InvalidKey(_))
        ));
    }
}
