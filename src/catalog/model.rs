//! Rows persisted by the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A publishing device, keyed by its natural id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Surrogate key.
    pub id: i64,
    /// Natural key reported by the device.
    pub device_uid: String,
    /// Display name; defaults to the natural key.
    pub name: String,
    /// Optional hardware classification.
    pub device_type: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Kind of image stored in an object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Unprocessed capture straight from the device.
    #[default]
    Raw,
    /// Output of a downstream processing stage.
    Processed,
}

impl ImageType {
    /// Column value for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
        }
    }

    /// Parse a column value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "raw" => Some(Self::Raw),
            "processed" => Some(Self::Processed),
            _ => None,
        }
    }
}

/// Downstream processing state of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Stored, awaiting downstream processing.
    #[default]
    Pending,
    /// Picked up by a downstream worker.
    Processing,
    /// Downstream processing finished.
    Completed,
    /// Downstream processing gave up.
    Failed,
}

impl ObjectStatus {
    /// Column value for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a column value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Image row as submitted for insertion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewImageObject {
    /// Owning device.
    pub device_id: i64,
    /// When the image was captured or, failing that, persisted.
    pub recorded_at: DateTime<Utc>,
    /// Bucket holding the object.
    pub bucket: String,
    /// Object name within the bucket.
    pub object_name: String,
    /// Version reported by the object store, if any.
    pub object_version: Option<String>,
    /// SHA-256 of the object bytes, lowercase hex.
    pub checksum: String,
    /// Kind of image.
    pub image_type: ImageType,
    /// Processing state.
    pub status: ObjectStatus,
    /// Free-form JSON attributes such as the source topic.
    pub metadata: serde_json::Value,
}

/// Image row as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageObject {
    /// Surrogate key.
    pub id: i64,
    /// Submitted column values.
    #[serde(flatten)]
    pub fields: NewImageObject,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
