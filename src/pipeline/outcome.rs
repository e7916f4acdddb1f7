//! Terminal classification of one message's trip through the pipeline.

use crate::{
    catalog::CatalogError,
    fragment::{AssemblyError, ItemId, MessageError, SourceId},
    kv::KvError,
    object_store::{ObjectStoreError, PutReceipt},
};

/// Summary of an item that reached durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedItem {
    /// Logical item that was assembled.
    pub item: ItemId,
    /// Source that published it.
    pub source: SourceId,
    /// Bucket holding the object.
    pub bucket: String,
    /// Object name within the bucket.
    pub object_name: String,
    /// SHA-256 of the assembled bytes, lowercase hex.
    pub checksum: String,
    /// Assembled size in bytes.
    pub size: usize,
    /// Upload acknowledgement.
    pub receipt: PutReceipt,
    /// Catalog row id, when known.
    pub catalog_id: Option<i64>,
}

/// What happened to a single bus message.
///
/// Only [`Outcome::Persisted`] and [`Outcome::DuplicatePersist`] mean the
/// item is durable. Everything else either awaits more fragments or leaves
/// the item to be retried by a resend within the fragment TTL.
#[derive(Debug)]
pub enum Outcome {
    /// The payload failed validation and was dropped.
    Malformed(MessageError),
    /// The item already carries a completion marker.
    AlreadyProcessed {
        /// Item the fragment belonged to.
        item: ItemId,
    },
    /// The fragment was stored; the item is still incomplete.
    Stored {
        /// Item the fragment belongs to.
        item: ItemId,
        /// Distinct indices stored so far.
        received: usize,
        /// Fragment count recorded for the item.
        expected: u32,
    },
    /// The shared key-value store failed before the critical section.
    StoreUnavailable(KvError),
    /// Another worker holds the assembly lock for this item.
    LockContended {
        /// Item whose lock was held.
        item: ItemId,
    },
    /// Reassembly failed; the item is left unmarked.
    AssemblyFailed(AssemblyError),
    /// The object store rejected the upload.
    UploadFailed {
        /// Item that could not be stored.
        item: ItemId,
        /// Backend error.
        error: ObjectStoreError,
    },
    /// The catalog rejected the device lookup or image insert.
    CatalogFailed {
        /// Item whose row could not be written.
        item: ItemId,
        /// Backend error.
        error: CatalogError,
    },
    /// The critical section panicked; the lock was still released.
    Panicked {
        /// Item being assembled.
        item: ItemId,
        /// Rendered panic payload.
        message: String,
    },
    /// The item was uploaded and catalogued for the first time.
    Persisted(PersistedItem),
    /// The item was uploaded but its catalog row already existed.
    DuplicatePersist(PersistedItem),
}

impl Outcome {
    /// Short label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::Stored { .. } => "stored",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::LockContended { .. } => "lock_contended",
            Self::AssemblyFailed(_) => "assembly_failed",
            Self::UploadFailed { .. } => "upload_failed",
            Self::CatalogFailed { .. } => "catalog_failed",
            Self::Panicked { .. } => "panicked",
            Self::Persisted(_) => "persisted",
            Self::DuplicatePersist(_) => "duplicate_persist",
        }
    }

    /// The persisted item, for either durable outcome.
    #[must_use]
    pub const fn persisted(&self) -> Option<&PersistedItem> {
        match self {
            Self::Persisted(item) | Self::DuplicatePersist(item) => Some(item),
            _ => None,
        }
    }
}
