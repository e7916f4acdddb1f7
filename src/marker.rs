//! Durable dedupe record for items that were already fully processed.
//!
//! A marker is written once, atomically, after an item has been persisted.
//! While it lives, every further fragment for the item is dropped before it
//! reaches fragment storage. Markers outlive fragment records so that late
//! duplicates arriving after eviction are still recognised; once the marker
//! expires an identical resend would be processed again.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{
    fragment::ItemId,
    kv::{KvError, KvStore},
};

const MARKER_PREFIX: &str = "completed:";

/// TTL-bounded "already processed" flag per logical item.
#[derive(Clone)]
pub struct CompletionMarker {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl std::fmt::Debug for CompletionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionMarker")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CompletionMarker {
    /// Default marker lifetime: one hour.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Create a marker writer with the given lifetime.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self { Self { kv, ttl } }

    /// Lifetime applied to new markers.
    #[must_use]
    pub const fn ttl(&self) -> Duration { self.ttl }

    /// Record that `item` was processed.
    ///
    /// Returns `false` when a live marker already existed; the existing
    /// marker keeps its original expiry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store rejects the write.
    pub async fn mark(&self, item: &ItemId) -> Result<bool, KvError> {
        self.kv
            .set_nx(&marker_key(item), Bytes::from_static(b"1"), Some(self.ttl))
            .await
    }

    /// Whether a live marker exists for `item`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store cannot be queried.
    pub async fn is_marked(&self, item: &ItemId) -> Result<bool, KvError> {
        self.kv.exists(&marker_key(item)).await
    }
}

fn marker_key(item: &ItemId) -> String { format!("{MARKER_PREFIX}{item}") }
