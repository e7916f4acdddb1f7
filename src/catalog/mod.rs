//! Relational catalog of devices and persisted images.
//!
//! The pipeline needs two guarantees from the catalog: devices are
//! get-or-create by their natural key, and image rows are unique per
//! `(bucket, object_name)`. A second insert for the same object surfaces as
//! [`CatalogError::Duplicate`] so callers can treat it as already durable.

mod memory;
pub mod model;
mod sqlite;

use async_trait::async_trait;
pub use memory::MemoryCatalog;
pub use model::{Device, ImageObject, ImageType, NewImageObject, ObjectStatus};
pub use sqlite::{CATALOG_SCHEMA_VERSION, SqliteCatalog};
use thiserror::Error;

/// Errors raised by a [`CatalogStore`] backend.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// An image row for this object already exists.
    #[error("image row already exists for {bucket}/{object_name}")]
    Duplicate {
        /// Bucket of the conflicting row.
        bucket: String,
        /// Object name of the conflicting row.
        object_name: String,
    },
    /// The backend could not be reached or is shutting down.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded.
    #[error("corrupt catalog row: {0}")]
    Corrupt(String),
    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Catalog operations consumed by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    /// Return the device with `device_uid`, creating it when absent.
    ///
    /// Concurrent creators converge on a single row.
    async fn get_or_create_device(&self, device_uid: &str) -> Result<Device, CatalogError>;

    /// Insert an image row.
    ///
    /// Returns [`CatalogError::Duplicate`] if a row for the same bucket and
    /// object name exists.
    async fn insert_image(&self, image: NewImageObject) -> Result<ImageObject, CatalogError>;

    /// Look up the image row for `bucket/object_name`.
    async fn find_image(
        &self,
        bucket: &str,
        object_name: &str,
    ) -> Result<Option<ImageObject>, CatalogError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), CatalogError>;
}
