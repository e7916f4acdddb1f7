#![doc(html_root_url = "https://docs.rs/ingestor/latest")]
//! Public API for the `ingestor` library.
//!
//! Devices publish images as small indexed fragments over an at-least-once,
//! unordered bus. This crate stores those fragments in a shared key-value
//! backend, detects when an item is complete, and hands the reassembled
//! bytes to durable storage exactly once even when several workers race.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod fragment;
pub mod gc;
pub mod health;
pub mod kv;
pub mod lock;
pub mod marker;
pub mod metrics;
pub mod object_store;
pub mod panic;
pub mod pipeline;
pub mod publish;
pub mod session;
pub mod worker;

pub use config::{ConfigError, IngestConfig};
pub use fragment::{
    AssemblyError,
    BusMessage,
    FragmentIndex,
    FragmentMessage,
    FragmentStatus,
    FragmentStore,
    ItemId,
    SourceId,
};
pub use gc::{GarbageCollector, SweepReport};
pub use health::{HealthProbe, HealthReport};
pub use lock::DistributedLock;
pub use marker::CompletionMarker;
pub use pipeline::{Backends, Orchestrator, Outcome, PersistedItem};
pub use session::SessionMapper;
pub use worker::{IngestWorker, WorkerSummary};
