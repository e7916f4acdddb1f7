use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use sha2::{Digest, Sha256};

use super::{ObjectStore, ObjectStoreError, PutReceipt, validate_name};

/// One object held by [`MemoryObjectStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object bytes.
    pub body: Bytes,
    /// MIME type supplied at upload.
    pub content_type: String,
    /// Monotonic version assigned at upload.
    pub version: u64,
}

/// In-process [`ObjectStore`] that counts every upload.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: DashSet<String>,
    objects: DashMap<(String, String), StoredObject>,
    uploads: AtomicUsize,
    next_version: AtomicU64,
}

impl MemoryObjectStore {
    /// Create an empty store with no buckets.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Fetch a stored object.
    #[must_use]
    pub fn get(&self, bucket: &str, name: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_owned(), name.to_owned()))
            .map(|entry| entry.value().clone())
    }

    /// Number of successful `put` calls, overwrites included.
    #[must_use]
    pub fn upload_count(&self) -> usize { self.uploads.load(Ordering::SeqCst) }

    /// Number of distinct objects held.
    #[must_use]
    pub fn len(&self) -> usize { self.objects.len() }

    /// Whether no objects are held.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.objects.is_empty() }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        self.buckets.insert(bucket.to_owned());
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<PutReceipt, ObjectStoreError> {
        validate_name(name)?;
        if !self.buckets.contains(bucket) {
            return Err(ObjectStoreError::NoSuchBucket(bucket.to_owned()));
        }
        let etag = hex::encode(Sha256::digest(&body));
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.objects.insert(
            (bucket.to_owned(), name.to_owned()),
            StoredObject {
                body,
                content_type: content_type.to_owned(),
                version,
            },
        );
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(PutReceipt {
            etag,
            version: Some(version.to_string()),
        })
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_requires_bucket_and_overwrites_by_name() {
        let store = MemoryObjectStore::new();
        let err = store
            .put("raw", "cam/a.jpg", Bytes::from_static(b"x"), "image/jpeg")
            .await
            .expect_err("bucket missing");
        assert!(matches!(err, ObjectStoreError::NoSuchBucket(_)));

        store.ensure_bucket("raw").await.expect("bucket");
        let first = store
            .put("raw", "cam/a.jpg", Bytes::from_static(b"one"), "image/jpeg")
            .await
            .expect("put");
        let second = store
            .put("raw", "cam/a.jpg", Bytes::from_static(b"two"), "image/jpeg")
            .await
            .expect("overwrite");

        assert_ne!(first.version, second.version);
        assert_eq!(store.len(), 1);
        assert_eq!(store.upload_count(), 2);
        let stored = store.get("raw", "cam/a.jpg").expect("stored");
        assert_eq!(stored.body, Bytes::from_static(b"two"));
        assert_eq!(stored.content_type, "image/jpeg");
    }
}
