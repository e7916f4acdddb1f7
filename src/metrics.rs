//! Metric helpers for the ingest pipeline.
//!
//! Names are exported as constants so dashboards and tests agree on them.
//! With the `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Counter of fragments accepted into fragment storage.
pub const FRAGMENTS_RECEIVED: &str = "ingestor_fragments_received_total";
/// Counter of messages dropped before persistence, labelled by `reason`.
pub const MESSAGES_DROPPED: &str = "ingestor_messages_dropped_total";
/// Counter of items uploaded and catalogued for the first time.
pub const ITEMS_PERSISTED: &str = "ingestor_items_persisted_total";
/// Counter of catalog inserts rejected as duplicates.
pub const DUPLICATE_INSERTS: &str = "ingestor_duplicate_inserts_total";
/// Counter of abandoned items removed by the garbage collector.
pub const GC_EVICTIONS: &str = "ingestor_gc_evictions_total";
/// Counter of failures, labelled by pipeline `stage`.
pub const ERRORS_TOTAL: &str = "ingestor_errors_total";
/// Counter of panics contained by the ingest worker.
pub const PIPELINE_PANICS: &str = "ingestor_pipeline_panics_total";

/// Why a message stopped short of persistence without being an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Payload failed validation.
    Malformed,
    /// Item already carries a completion marker.
    AlreadyProcessed,
    /// Another worker holds the assembly lock.
    LockContended,
}

impl DropReason {
    /// Label value for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::AlreadyProcessed => "already_processed",
            Self::LockContended => "lock_contended",
        }
    }
}

/// Pipeline stage that reported a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Session lookup, dedupe check, or fragment write.
    Store,
    /// Reassembly of stored fragments.
    Assemble,
    /// Object store upload.
    Upload,
    /// Device lookup or image insert.
    Catalog,
    /// Downstream event emission.
    Publish,
    /// Completion marker, session release, or lock release.
    Finalize,
    /// Garbage-collection sweep.
    Gc,
}

impl Stage {
    /// Label value for this stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Assemble => "assemble",
            Self::Upload => "upload",
            Self::Catalog => "catalog",
            Self::Publish => "publish",
            Self::Finalize => "finalize",
            Self::Gc => "gc",
        }
    }
}

/// Record a fragment written to storage.
pub fn inc_fragments_received() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_RECEIVED).increment(1);
}

/// Record a dropped message.
pub fn inc_dropped(reason: DropReason) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DROPPED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record an item persisted for the first time.
pub fn inc_persisted() {
    #[cfg(feature = "metrics")]
    counter!(ITEMS_PERSISTED).increment(1);
}

/// Record a duplicate catalog insert.
pub fn inc_duplicate_inserts() {
    #[cfg(feature = "metrics")]
    counter!(DUPLICATE_INSERTS).increment(1);
}

/// Record `count` items evicted by one garbage-collection sweep.
pub fn add_gc_evictions(count: u64) {
    #[cfg(feature = "metrics")]
    counter!(GC_EVICTIONS).increment(count);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a failure in `stage`.
pub fn inc_errors(stage: Stage) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "stage" => stage.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// Record a panic caught while handling a message.
pub fn inc_pipeline_panics() {
    #[cfg(feature = "metrics")]
    counter!(PIPELINE_PANICS).increment(1);
}
