//! Error and status types emitted by the fragment layer.
//!
//! These types keep the storage and assembly logic decoupled from the
//! pipeline while still surfacing precise diagnostics for logs and tests.

use base64::DecodeError;
use thiserror::Error;

use super::{FragmentIndex, ItemId};
use crate::kv::KvError;

/// Result of storing one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentStatus {
    /// The item still expects more distinct indices.
    Incomplete {
        /// Distinct indices stored so far.
        received: usize,
        /// Fragment count recorded from the first fragment seen.
        expected: u32,
    },
    /// Distinct stored indices reached the recorded fragment count.
    Complete {
        /// Fragment count recorded from the first fragment seen.
        expected: u32,
    },
}

impl FragmentStatus {
    /// Whether the item is ready for assembly.
    #[must_use]
    pub const fn is_complete(self) -> bool { matches!(self, Self::Complete { .. }) }
}

/// Errors produced while turning stored fragments into item bytes.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// No metadata record exists for the item (never seen, evicted, or expired).
    #[error("no metadata for item {item}")]
    NoMetadata {
        /// Item that was requested.
        item: ItemId,
    },
    /// Fewer distinct indices are stored than the item expects.
    #[error("item {item} incomplete: {received}/{expected} fragments")]
    Incomplete {
        /// Item that was requested.
        item: ItemId,
        /// Distinct indices stored.
        received: usize,
        /// Recorded fragment count.
        expected: u32,
    },
    /// Enough indices are stored but some of `0..expected` are missing.
    #[error("item {item} has gaps at indices {missing:?}")]
    GapDetected {
        /// Item that was requested.
        item: ItemId,
        /// Indices in the expected range with no stored payload.
        missing: Vec<FragmentIndex>,
    },
    /// A stored payload is not valid base64.
    #[error("item {item} fragment {index} failed to decode: {source}")]
    Decode {
        /// Item that was requested.
        item: ItemId,
        /// Fragment whose payload was rejected.
        index: FragmentIndex,
        /// Underlying decoder error.
        #[source]
        source: DecodeError,
    },
    /// The backing store failed mid-assembly.
    #[error("fragment store unavailable: {0}")]
    Store(#[from] KvError),
}

impl AssemblyError {
    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoMetadata { .. } => "no_metadata",
            Self::Incomplete { .. } => "incomplete",
            Self::GapDetected { .. } => "gap_detected",
            Self::Decode { .. } => "decode_error",
            Self::Store(_) => "store_unavailable",
        }
    }
}
