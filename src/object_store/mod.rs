//! Durable blob storage for finished items.
//!
//! The pipeline only needs a bucketed `put` with overwrite-on-same-name
//! semantics, so a resend of an item rewrites the same object instead of
//! creating a second one. [`MemoryObjectStore`] backs tests and dry runs;
//! [`FsObjectStore`] maps buckets to directories on local disk.

mod fs;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
pub use fs::FsObjectStore;
pub use memory::{MemoryObjectStore, StoredObject};
use thiserror::Error;

/// Errors raised by an [`ObjectStore`] backend.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The target bucket has not been created.
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),
    /// The object name would escape its bucket or is empty.
    #[error("invalid object name {0:?}")]
    InvalidName(String),
    /// The backend could not be reached.
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Acknowledgement returned by a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutReceipt {
    /// Content hash reported by the backend.
    pub etag: String,
    /// Backend version id, when the bucket is versioned.
    pub version: Option<String>,
}

/// Bucketed blob store consumed by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create `bucket` if it does not already exist.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    /// Upload `body` as `bucket/name`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<PutReceipt, ObjectStoreError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), ObjectStoreError>;
}

/// Reject names that are empty or could resolve outside their bucket.
pub(crate) fn validate_name(name: &str) -> Result<(), ObjectStoreError> {
    let escapes = name.starts_with('/')
        || name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if escapes {
        return Err(ObjectStoreError::InvalidName(name.to_owned()));
    }
    Ok(())
}
