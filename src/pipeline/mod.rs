//! Per-message pipeline from bus fragment to durable, catalogued object.
//!
//! [`Orchestrator::handle`] runs one message through a fixed sequence of
//! stages: parse, resolve the item id, drop already-processed items, store
//! the fragment, and, when the item just became complete, take the assembly
//! lock and persist it. Every failure short-circuits into an [`Outcome`];
//! nothing is returned as an error and panics inside the critical section
//! are contained after the lock has been released.

mod outcome;
#[cfg(test)]
mod tests;

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, error, info, warn};
pub use outcome::{Outcome, PersistedItem};
use sha2::{Digest, Sha256};

use crate::{
    catalog::{CatalogError, CatalogStore, ImageType, NewImageObject, ObjectStatus},
    clock::Clock,
    config::IngestConfig,
    fragment::{BusMessage, FragmentMessage, FragmentStatus, FragmentStore, ItemId, SourceId},
    kv::{KvError, KvStore},
    lock::DistributedLock,
    marker::CompletionMarker,
    metrics::{self, DropReason, Stage},
    object_store::ObjectStore,
    panic::format_panic,
    publish::{EventPublisher, ProcessedEvent},
    session::SessionMapper,
};

/// MIME type recorded for every uploaded item.
pub const CONTENT_TYPE: &str = "image/jpeg";

/// Shared clients the pipeline is built on.
#[derive(Clone)]
pub struct Backends {
    /// Shared key-value store for fragments, markers, sessions, and locks.
    pub kv: Arc<dyn KvStore>,
    /// Time source for liveness stamps and catalog timestamps.
    pub clock: Arc<dyn Clock>,
    /// Destination for assembled items.
    pub objects: Arc<dyn ObjectStore>,
    /// Device and image catalog.
    pub catalog: Arc<dyn CatalogStore>,
    /// Optional downstream notifier.
    pub publisher: Option<Arc<dyn EventPublisher>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

/// Object name for an item persisted at `unix_secs`.
///
/// The timestamp keeps an item id that is reused after its completion marker
/// expired from overwriting the object already catalogued under that id.
#[must_use]
pub fn object_name(source: &SourceId, item: &ItemId, unix_secs: i64) -> String {
    format!("{source}/{item}-{unix_secs}.jpg")
}

/// Wires fragment storage, sessions, locking, and persistence together.
#[derive(Clone)]
pub struct Orchestrator {
    fragments: FragmentStore,
    sessions: SessionMapper,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
    bucket: String,
    lock_ttl: Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bucket", &self.bucket)
            .field("lock_ttl", &self.lock_ttl)
            .field("fragments", &self.fragments)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build a pipeline over `backends` using the TTLs and bucket in `config`.
    #[must_use]
    pub fn new(config: &IngestConfig, backends: Backends) -> Self {
        let Backends {
            kv,
            clock,
            objects,
            catalog,
            publisher,
        } = backends;
        let marker = CompletionMarker::new(Arc::clone(&kv), config.completion_ttl());
        Self {
            fragments: FragmentStore::new(
                Arc::clone(&kv),
                Arc::clone(&clock),
                config.fragment_ttl(),
                marker,
            ),
            sessions: SessionMapper::new(Arc::clone(&kv), config.session_ttl()),
            lock: DistributedLock::new(kv),
            clock,
            objects,
            catalog,
            publisher,
            bucket: config.bucket.clone(),
            lock_ttl: config.lock_ttl(),
        }
    }

    /// Fragment store used by this pipeline.
    #[must_use]
    pub fn fragments(&self) -> &FragmentStore { &self.fragments }

    /// Session mapper used by this pipeline.
    #[must_use]
    pub fn sessions(&self) -> &SessionMapper { &self.sessions }

    /// Bucket receiving finished items.
    #[must_use]
    pub fn bucket(&self) -> &str { &self.bucket }

    /// Run one bus message through every stage.
    ///
    /// Never fails and never unwinds into the caller; the returned
    /// [`Outcome`] says where the message stopped.
    pub async fn handle(&self, message: BusMessage) -> Outcome {
        let fragment = match FragmentMessage::parse(&message) {
            Ok(fragment) => fragment,
            Err(e) => {
                info!(
                    "dropping malformed message: topic={}, error={e}",
                    message.topic
                );
                metrics::inc_dropped(DropReason::Malformed);
                return Outcome::Malformed(e);
            }
        };

        let (item, from_session) = match &fragment.item {
            Some(item) => (item.clone(), false),
            None => match self.sessions.get_or_create(&fragment.source).await {
                Ok(item) => (item, true),
                Err(e) => return store_unavailable("session lookup", e),
            },
        };

        match self.fragments.already_processed(&item).await {
            Ok(true) => {
                debug!(
                    "dropping fragment of processed item: item={item}, index={}",
                    fragment.index
                );
                metrics::inc_dropped(DropReason::AlreadyProcessed);
                return Outcome::AlreadyProcessed { item };
            }
            Ok(false) => {}
            Err(e) => return store_unavailable("dedupe check", e),
        }

        let status = match self
            .fragments
            .add_fragment(&item, fragment.index, fragment.total, &fragment.data)
            .await
        {
            Ok(status) => status,
            Err(e) => return store_unavailable("fragment write", e),
        };
        metrics::inc_fragments_received();
        if let FragmentStatus::Incomplete { received, expected } = status {
            return Outcome::Stored {
                item,
                received,
                expected,
            };
        }

        let lock_name = DistributedLock::assemble_name(&item);
        if !self.lock.acquire(&lock_name, self.lock_ttl).await {
            info!("assembly lock held elsewhere: item={item}");
            metrics::inc_dropped(DropReason::LockContended);
            return Outcome::LockContended { item };
        }

        let result = AssertUnwindSafe(self.persist(&fragment, &item, from_session))
            .catch_unwind()
            .await;

        if let Err(e) = self.lock.release(&lock_name).await {
            warn!("failed to release assembly lock: item={item}, error={e}");
            metrics::inc_errors(Stage::Finalize);
        }

        match result {
            Ok(outcome) => outcome,
            Err(panic) => {
                let panic_msg = format_panic(&*panic).to_string();
                metrics::inc_pipeline_panics();
                error!("assembly panicked: item={item}, panic={panic_msg}");
                tracing::error!(item = %item, panic = %panic_msg, "assembly panicked");
                Outcome::Panicked {
                    item,
                    message: panic_msg,
                }
            }
        }
    }

    /// Critical section: assemble, upload, catalogue, publish, and mark.
    async fn persist(
        &self,
        fragment: &FragmentMessage,
        item: &ItemId,
        from_session: bool,
    ) -> Outcome {
        // A racing worker may have finished the item while we waited.
        match self.fragments.already_processed(item).await {
            Ok(true) => {
                metrics::inc_dropped(DropReason::AlreadyProcessed);
                return Outcome::AlreadyProcessed { item: item.clone() };
            }
            Ok(false) => {}
            Err(e) => return store_unavailable("dedupe recheck", e),
        }

        let bytes = match self.fragments.assemble(item).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(
                    "assembly failed: item={item}, kind={}, error={e}",
                    e.kind()
                );
                metrics::inc_errors(Stage::Assemble);
                return Outcome::AssemblyFailed(e);
            }
        };

        let checksum = hex::encode(Sha256::digest(&bytes));
        let recorded_at = DateTime::<Utc>::from(self.clock.now());
        let name = object_name(&fragment.source, item, recorded_at.timestamp());
        let size = bytes.len();
        let receipt = match self.objects.put(&self.bucket, &name, bytes, CONTENT_TYPE).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(
                    "upload failed: item={item}, bucket={}, object={name}, error={e}",
                    self.bucket
                );
                metrics::inc_errors(Stage::Upload);
                return Outcome::UploadFailed {
                    item: item.clone(),
                    error: e,
                };
            }
        };
        debug!("object uploaded: item={item}, object={name}, etag={}", receipt.etag);

        let mut persisted = PersistedItem {
            item: item.clone(),
            source: fragment.source.clone(),
            bucket: self.bucket.clone(),
            object_name: name,
            checksum,
            size,
            receipt,
            catalog_id: None,
        };

        let fresh = match self.catalogue(fragment, &persisted, recorded_at).await {
            Ok(Some(id)) => {
                persisted.catalog_id = Some(id);
                true
            }
            Ok(None) => {
                persisted.catalog_id = self
                    .catalog
                    .find_image(&persisted.bucket, &persisted.object_name)
                    .await
                    .ok()
                    .flatten()
                    .map(|row| row.id);
                false
            }
            Err(e) => {
                error!("catalog write failed: item={item}, error={e}");
                metrics::inc_errors(Stage::Catalog);
                return Outcome::CatalogFailed {
                    item: item.clone(),
                    error: e,
                };
            }
        };

        if fresh && let Some(id) = persisted.catalog_id {
            self.announce(id, &persisted.object_name).await;
        }
        self.finalize(&fragment.source, item, from_session).await;

        if fresh {
            info!(
                "item persisted: item={item}, object={}, bytes={}, sha256={}",
                persisted.object_name, persisted.size, persisted.checksum
            );
            metrics::inc_persisted();
            Outcome::Persisted(persisted)
        } else {
            Outcome::DuplicatePersist(persisted)
        }
    }

    /// Write the device and image rows.
    ///
    /// Returns the new row id, or `None` when the image row already existed.
    async fn catalogue(
        &self,
        fragment: &FragmentMessage,
        persisted: &PersistedItem,
        recorded_at: DateTime<Utc>,
    ) -> Result<Option<i64>, CatalogError> {
        let device = self
            .catalog
            .get_or_create_device(fragment.source.as_str())
            .await?;
        let row = NewImageObject {
            device_id: device.id,
            recorded_at,
            bucket: persisted.bucket.clone(),
            object_name: persisted.object_name.clone(),
            object_version: persisted.receipt.version.clone(),
            checksum: persisted.checksum.clone(),
            image_type: ImageType::Raw,
            status: ObjectStatus::Pending,
            metadata: serde_json::json!({ "source_topic": fragment.topic }),
        };
        match self.catalog.insert_image(row).await {
            Ok(row) => Ok(Some(row.id)),
            Err(CatalogError::Duplicate {
                bucket,
                object_name,
            }) => {
                warn!(
                    "image already catalogued: item={}, bucket={bucket}, object={object_name}",
                    persisted.item
                );
                metrics::inc_duplicate_inserts();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn announce(&self, id: i64, object_name: &str) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let event = ProcessedEvent {
            id,
            processed_object: object_name.to_owned(),
            status: ObjectStatus::Pending,
        };
        if let Err(e) = publisher.publish(event).await {
            warn!("failed to publish processed event: id={id}, object={object_name}, error={e}");
            metrics::inc_errors(Stage::Publish);
        }
    }

    /// Mark the item processed and release its session binding.
    ///
    /// The data is already durable here, so failures are logged only.
    async fn finalize(&self, source: &SourceId, item: &ItemId, from_session: bool) {
        if let Err(e) = self.fragments.mark_processed(item).await {
            error!("failed to mark item processed: item={item}, error={e}");
            metrics::inc_errors(Stage::Finalize);
        }
        if from_session && let Err(e) = self.sessions.release(source).await {
            warn!("failed to release session: source={source}, error={e}");
            metrics::inc_errors(Stage::Finalize);
        }
    }
}

fn store_unavailable(stage: &str, error: KvError) -> Outcome {
    error!("fragment store unavailable: stage={stage}, error={error}");
    metrics::inc_errors(Stage::Store);
    Outcome::StoreUnavailable(error)
}
