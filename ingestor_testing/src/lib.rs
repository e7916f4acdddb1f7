//! Test support for the `ingestor` crate.
//!
//! Provides fragment builders, an in-memory [`Harness`] wiring every
//! backend to a shared mock clock, log capture, and metric lookups.
//!
//! ```rust
//! use ingestor::pipeline::Outcome;
//! use ingestor_testing::{Harness, sample_image, split_fragments};
//!
//! # async fn demo() {
//! let harness = Harness::start().await;
//! let pipeline = harness.orchestrator();
//! let mut last = None;
//! for msg in split_fragments("cam-1", Some("img-1"), &sample_image(64), 4) {
//!     last = Some(pipeline.handle(msg).await);
//! }
//! assert!(matches!(last, Some(Outcome::Persisted(_))));
//! # }
//! ```

pub mod fixtures;
pub mod logging;
pub mod metrics;

pub use fixtures::{BUCKET, EPOCH_SECS, Harness, fragment, sample_image, split_fragments, topic_for};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_value, debugging_recorder};
