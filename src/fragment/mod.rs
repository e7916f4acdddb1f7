//! Fragment primitives and storage for item reassembly.
//!
//! This module collects the domain types used by the ingestion layer:
//! identifiers, indices, inbound message validation, and the shared
//! [`FragmentStore`] that accumulates fragments until an item is complete.
//! Each sub-module focuses on a single concept to keep the code small and
//! easy to audit while still providing a cohesive API at the crate root.

pub mod error;
pub mod id;
pub mod index;
pub mod message;
pub mod store;
pub mod topic;

pub use error::{AssemblyError, FragmentStatus};
pub use id::{ItemId, SourceId};
pub use index::FragmentIndex;
pub use message::{BusMessage, FragmentMessage, FragmentPayload, MessageError};
pub use store::{FragmentStore, ItemProgress};
pub use topic::TopicFilter;
