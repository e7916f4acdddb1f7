use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{CatalogError, CatalogStore, Device, ImageObject, NewImageObject};

/// In-process [`CatalogStore`] with the same uniqueness rules as SQL.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    devices: DashMap<String, Device>,
    images: DashMap<(String, String), ImageObject>,
    next_id: AtomicI64,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of image rows.
    #[must_use]
    pub fn image_count(&self) -> usize { self.images.len() }

    /// Number of device rows.
    #[must_use]
    pub fn device_count(&self) -> usize { self.devices.len() }

    fn allocate_id(&self) -> i64 { self.next_id.fetch_add(1, Ordering::SeqCst) + 1 }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_or_create_device(&self, device_uid: &str) -> Result<Device, CatalogError> {
        let device = self
            .devices
            .entry(device_uid.to_owned())
            .or_insert_with(|| Device {
                id: self.allocate_id(),
                device_uid: device_uid.to_owned(),
                name: device_uid.to_owned(),
                device_type: None,
                created_at: Utc::now(),
            });
        Ok(device.value().clone())
    }

    async fn insert_image(&self, image: NewImageObject) -> Result<ImageObject, CatalogError> {
        let key = (image.bucket.clone(), image.object_name.clone());
        match self.images.entry(key) {
            Entry::Occupied(_) => Err(CatalogError::Duplicate {
                bucket: image.bucket,
                object_name: image.object_name,
            }),
            Entry::Vacant(vacant) => {
                let row = ImageObject {
                    id: self.allocate_id(),
                    fields: image,
                    created_at: Utc::now(),
                };
                vacant.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn find_image(
        &self,
        bucket: &str,
        object_name: &str,
    ) -> Result<Option<ImageObject>, CatalogError> {
        Ok(self
            .images
            .get(&(bucket.to_owned(), object_name.to_owned()))
            .map(|row| row.value().clone()))
    }

    async fn ping(&self) -> Result<(), CatalogError> { Ok(()) }
}
