//! Shared-storage accumulator that stitches fragments back into items.
//!
//! [`FragmentStore`] keeps every in-progress item in the shared
//! [`KvStore`]: one hash of `index -> encoded payload` plus one metadata
//! hash holding the fragment count declared by the first fragment and the
//! last-activity timestamp. Nothing is cached in-process, so every instance
//! subscribed to the bus sees the same progress.
//!
//! Writes are per-index and last-write-wins, which keeps duplicate and
//! out-of-order delivery harmless without any locking. Completion is purely
//! a count of distinct stored indices; [`FragmentStore::assemble`] then
//! re-checks that the expected range is actually covered before decoding.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use log::{debug, info, warn};

use super::{AssemblyError, FragmentIndex, FragmentStatus, ItemId};
use crate::{
    clock::Clock,
    kv::{KvError, KvStore},
    marker::CompletionMarker,
};

const FRAGMENTS_PREFIX: &str = "fragments:";
const META_PREFIX: &str = "fragment_meta:";
const TOTAL_FIELD: &str = "total";
const ACTIVITY_FIELD: &str = "last_activity";

fn fragments_key(item: &ItemId) -> String { format!("{FRAGMENTS_PREFIX}{item}") }

fn meta_key(item: &ItemId) -> String { format!("{META_PREFIX}{item}") }

fn decimal(value: impl ToString) -> Bytes { Bytes::from(value.to_string()) }

fn parse_decimal<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Snapshot of an in-progress item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemProgress {
    /// Fragment count recorded from the first fragment seen.
    pub expected: u32,
    /// Distinct indices currently stored.
    pub received: usize,
    /// Unix seconds of the most recent fragment.
    pub last_activity: u64,
}

/// Keyed storage of in-progress fragments and their metadata.
#[derive(Clone)]
pub struct FragmentStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    marker: CompletionMarker,
}

impl std::fmt::Debug for FragmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStore")
            .field("ttl", &self.ttl)
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl FragmentStore {
    /// Default inactivity window for fragment and metadata records: five minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// Create a store over `kv` whose records expire after `ttl` of inactivity.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        marker: CompletionMarker,
    ) -> Self {
        Self {
            kv,
            clock,
            ttl,
            marker,
        }
    }

    /// Inactivity window applied to fragment and metadata records.
    #[must_use]
    pub const fn ttl(&self) -> Duration { self.ttl }

    /// Store one fragment and report whether the item is now complete.
    ///
    /// The first call for an item records `expected_total`; later calls that
    /// declare a different total are logged and otherwise ignored. Every call
    /// refreshes the liveness timestamp and the TTL of both records; each write
    /// carries its TTL, so no record is ever stored without an expiry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store is unavailable.
    pub async fn add_fragment(
        &self,
        item: &ItemId,
        index: FragmentIndex,
        expected_total: NonZeroU32,
        payload: &str,
    ) -> Result<FragmentStatus, KvError> {
        let fragments = fragments_key(item);
        let meta = meta_key(item);

        let first = self
            .kv
            .hset_nx(&meta, TOTAL_FIELD, decimal(expected_total), Some(self.ttl))
            .await?;
        if !first
            && let Some(recorded) = self.recorded_total(item).await?
            && recorded != expected_total.get()
        {
            warn!(
                "fragment total mismatch: item={item}, index={index}, recorded={recorded}, \
                 declared={expected_total}"
            );
        }
        self.kv
            .hset(
                &meta,
                ACTIVITY_FIELD,
                decimal(self.clock.unix_secs()),
                Some(self.ttl),
            )
            .await?;
        self.kv
            .hset(
                &fragments,
                &index.to_field(),
                Bytes::from(payload.to_owned()),
                Some(self.ttl),
            )
            .await?;

        let received = self.kv.hlen(&fragments).await?;
        let expected = self
            .recorded_total(item)
            .await?
            .unwrap_or(expected_total.get());
        debug!("fragment stored: item={item}, index={index}, received={received}/{expected}");

        if received >= expected as usize {
            Ok(FragmentStatus::Complete { expected })
        } else {
            Ok(FragmentStatus::Incomplete { received, expected })
        }
    }

    /// Concatenate the decoded payloads of indices `0..expected` in order.
    ///
    /// Stored indices outside the expected range are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::NoMetadata`] when the item is unknown,
    /// [`AssemblyError::Incomplete`] when too few indices are stored,
    /// [`AssemblyError::GapDetected`] when the count is reached but the
    /// expected range is not covered, [`AssemblyError::Decode`] when a
    /// payload is not valid base64, and [`AssemblyError::Store`] when the
    /// backing store fails.
    pub async fn assemble(&self, item: &ItemId) -> Result<Vec<u8>, AssemblyError> {
        let Some(expected) = self.recorded_total(item).await? else {
            return Err(AssemblyError::NoMetadata { item: item.clone() });
        };

        let stored = self.kv.hgetall(&fragments_key(item)).await?;
        if stored.len() < expected as usize {
            return Err(AssemblyError::Incomplete {
                item: item.clone(),
                received: stored.len(),
                expected,
            });
        }

        let mut slots: Vec<Option<Bytes>> = vec![None; expected as usize];
        for (field, payload) in stored {
            match FragmentIndex::from_field(&field) {
                Ok(index) if index.get() < expected => slots[index.get() as usize] = Some(payload),
                Ok(index) => {
                    warn!("ignoring fragment outside expected range: item={item}, index={index}");
                }
                Err(_) => warn!("ignoring non-numeric fragment field: item={item}, field={field}"),
            }
        }

        let missing: Vec<FragmentIndex> = slots
            .iter()
            .zip(0_u32..)
            .filter(|(slot, _)| slot.is_none())
            .map(|(_, index)| FragmentIndex::new(index))
            .collect();
        if !missing.is_empty() {
            return Err(AssemblyError::GapDetected {
                item: item.clone(),
                missing,
            });
        }

        let mut assembled = Vec::new();
        for (payload, index) in slots.into_iter().flatten().zip(0_u32..) {
            STANDARD
                .decode_vec(&payload, &mut assembled)
                .map_err(|source| AssemblyError::Decode {
                    item: item.clone(),
                    index: FragmentIndex::new(index),
                    source,
                })?;
        }
        Ok(assembled)
    }

    /// Record `item` as processed, then evict its fragments.
    ///
    /// Eviction is best effort: failures are logged and left to TTL expiry.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] only when the completion marker cannot be written.
    pub async fn mark_processed(&self, item: &ItemId) -> Result<(), KvError> {
        if !self.marker.mark(item).await? {
            info!("completion marker already present: item={item}");
        }
        if let Err(e) = self.evict(item).await {
            warn!("failed to evict processed fragments: item={item}, error={e}");
        }
        Ok(())
    }

    /// Whether a live completion marker exists for `item`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store cannot be queried.
    pub async fn already_processed(&self, item: &ItemId) -> Result<bool, KvError> {
        self.marker.is_marked(item).await
    }

    /// Current progress of an in-progress item, if its metadata exists.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store cannot be queried.
    pub async fn progress(&self, item: &ItemId) -> Result<Option<ItemProgress>, KvError> {
        let Some(expected) = self.recorded_total(item).await? else {
            return Ok(None);
        };
        let last_activity = self
            .kv
            .hget(&meta_key(item), ACTIVITY_FIELD)
            .await?
            .and_then(|raw| parse_decimal(&raw))
            .unwrap_or(0);
        let received = self.kv.hlen(&fragments_key(item)).await?;
        Ok(Some(ItemProgress {
            expected,
            received,
            last_activity,
        }))
    }

    /// Delete the fragment and metadata records of `item`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store rejects the delete.
    pub async fn evict(&self, item: &ItemId) -> Result<(), KvError> {
        let fragments = fragments_key(item);
        let meta = meta_key(item);
        self.kv
            .delete(&[fragments.as_str(), meta.as_str()])
            .await
            .map(|_| ())
    }

    /// Items that currently have a metadata record.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing store cannot be scanned.
    pub async fn active_items(&self) -> Result<Vec<ItemId>, KvError> {
        Ok(self
            .kv
            .scan_prefix(META_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(META_PREFIX).map(ItemId::from))
            .collect())
    }

    async fn recorded_total(&self, item: &ItemId) -> Result<Option<u32>, KvError> {
        let raw = self.kv.hget(&meta_key(item), TOTAL_FIELD).await?;
        Ok(raw.and_then(|raw| {
            let total = parse_decimal::<u32>(&raw).filter(|total| *total > 0);
            if total.is_none() {
                warn!("unreadable fragment total in metadata: item={item}");
            }
            total
        }))
    }
}
