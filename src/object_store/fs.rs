use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use sha2::{Digest, Sha256};
use tokio::fs;

use super::{ObjectStore, ObjectStoreError, PutReceipt, validate_name};

/// [`ObjectStore`] that keeps each bucket as a directory under `root`.
///
/// Objects are written to a temporary sibling and renamed into place, so a
/// reader never observes a partially written file. Content types are not
/// persisted.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    /// Directory holding all buckets.
    #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    /// Filesystem path of `bucket/name`.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::InvalidName`] if either component could
    /// escape the store root.
    pub fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_name(bucket)?;
        validate_name(name)?;
        Ok(self.root.join(bucket).join(name))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        validate_name(bucket)?;
        fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<PutReceipt, ObjectStoreError> {
        let path = self.object_path(bucket, name)?;
        if !fs::try_exists(self.root.join(bucket)).await? {
            return Err(ObjectStoreError::NoSuchBucket(bucket.to_owned()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let etag = hex::encode(Sha256::digest(&body));
        let staging = path.with_extension(format!("{etag}.part"));
        fs::write(&staging, &body).await?;
        fs::rename(&staging, &path).await?;
        debug!("object written: path={}, bytes={}", path.display(), body.len());

        Ok(PutReceipt {
            etag,
            version: None,
        })
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}
