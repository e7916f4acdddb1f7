//! Fragment builders and an in-memory pipeline harness.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ingestor::{
    Backends,
    IngestConfig,
    Orchestrator,
    catalog::MemoryCatalog,
    clock::MockClock,
    fragment::BusMessage,
    kv::MemoryKv,
    object_store::{MemoryObjectStore, ObjectStore},
    publish::{ChannelPublisher, ProcessedEvent},
};
use tokio::sync::mpsc;

/// Bucket used by [`Harness`].
pub const BUCKET: &str = "thermo-raw";

/// Wall-clock start of every [`Harness`].
pub const EPOCH_SECS: u64 = 1_700_000_000;

/// Topic a camera with the given source id publishes on.
#[must_use]
pub fn topic_for(source: &str) -> String { format!("camera/{source}/image_json") }

/// Deterministic blob of `len` bytes.
#[must_use]
pub fn sample_image(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from((i * 31 + 7) % 251).unwrap_or_default())
        .collect()
}

/// Encode one fragment message.
#[must_use]
pub fn fragment(
    source: &str,
    item: Option<&str>,
    index: i64,
    total: i64,
    chunk: &[u8],
) -> BusMessage {
    let mut body = serde_json::json!({
        "index": index,
        "total": total,
        "data": STANDARD.encode(chunk),
    });
    if let Some(item) = item {
        body["image_id"] = serde_json::Value::from(item);
    }
    BusMessage::new(topic_for(source), body.to_string())
}

/// Split `blob` into `parts` fragments in index order.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn split_fragments(
    source: &str,
    item: Option<&str>,
    blob: &[u8],
    parts: usize,
) -> Vec<BusMessage> {
    assert!(parts > 0, "an item needs at least one fragment");
    let size = blob.len().div_ceil(parts).max(1);
    let total = i64::try_from(parts).expect("fragment count fits i64");
    (0..parts)
        .map(|i| {
            let start = (i * size).min(blob.len());
            let end = ((i + 1) * size).min(blob.len());
            let index = i64::try_from(i).expect("fragment index fits i64");
            fragment(source, item, index, total, &blob[start..end])
        })
        .collect()
}

/// Memory-backed stand-ins for every backend, sharing one mock clock.
///
/// Each [`Harness::orchestrator`] call builds an independent pipeline over
/// the same backends, the way separate worker processes share them.
pub struct Harness {
    /// Clock driving fragment timestamps and key expiry.
    pub clock: Arc<MockClock>,
    /// Shared key-value store.
    pub kv: Arc<MemoryKv>,
    /// Object store with [`BUCKET`] already created.
    pub objects: Arc<MemoryObjectStore>,
    /// Catalog.
    pub catalog: Arc<MemoryCatalog>,
    /// Receiver for processed-item events.
    pub events: mpsc::Receiver<ProcessedEvent>,
    /// Configuration handed to each orchestrator.
    pub config: IngestConfig,
    publisher: ChannelPublisher,
}

impl Harness {
    /// Build a harness with default configuration.
    pub async fn start() -> Self { Self::with_config(IngestConfig::default()).await }

    /// Build a harness with `config`; its bucket is replaced by [`BUCKET`].
    ///
    /// # Panics
    ///
    /// Panics if the in-memory bucket cannot be created.
    pub async fn with_config(mut config: IngestConfig) -> Self {
        config.bucket = BUCKET.to_owned();
        let clock = Arc::new(MockClock::with_time(
            UNIX_EPOCH + Duration::from_secs(EPOCH_SECS),
        ));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let objects = Arc::new(MemoryObjectStore::new());
        objects.ensure_bucket(BUCKET).await.expect("create bucket");
        let (publisher, events) = ChannelPublisher::new(64);
        Self {
            clock,
            kv,
            objects,
            catalog: Arc::new(MemoryCatalog::new()),
            events,
            config,
            publisher,
        }
    }

    /// Backends wired to this harness.
    #[must_use]
    pub fn backends(&self) -> Backends {
        Backends {
            kv: self.kv.clone(),
            clock: self.clock.clone(),
            objects: self.objects.clone(),
            catalog: self.catalog.clone(),
            publisher: Some(Arc::new(self.publisher.clone())),
        }
    }

    /// A fresh pipeline over the shared backends.
    #[must_use]
    pub fn orchestrator(&self) -> Orchestrator { Orchestrator::new(&self.config, self.backends()) }

    /// Current mock time.
    #[must_use]
    pub fn now(&self) -> SystemTime { ingestor::clock::Clock::now(self.clock.as_ref()) }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<ProcessedEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
