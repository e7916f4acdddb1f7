//! Zero-based fragment positioning within logical items.
//!
//! Provides [`FragmentIndex`], a type-safe wrapper around `u32`. Indices are
//! stored as decimal hash-field names in the backing store, so the type also
//! owns that text encoding.

use std::num::{ParseIntError, TryFromIntError};

use derive_more::{Display, From};

/// Zero-based ordinal describing a fragment's position within its item.
///
/// # Examples
///
/// ```
/// use ingestor::fragment::FragmentIndex;
/// let index = FragmentIndex::new(3);
/// assert_eq!(index.get(), 3);
/// assert_eq!(index.to_field(), "3");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("{_0}")]
pub struct FragmentIndex(u32);

impl FragmentIndex {
    /// Construct an index from a `u32` value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the first valid fragment index.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Hash-field name used to store this fragment.
    #[must_use]
    pub fn to_field(self) -> String { self.0.to_string() }

    /// Parse a hash-field name written by [`to_field`](Self::to_field).
    ///
    /// # Errors
    ///
    /// Returns [`ParseIntError`] when the field is not a decimal `u32`.
    pub fn from_field(field: &str) -> Result<Self, ParseIntError> { field.parse().map(Self) }
}

impl TryFrom<usize> for FragmentIndex {
    type Error = TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> { u32::try_from(value).map(Self) }
}

impl From<FragmentIndex> for u32 {
    fn from(value: FragmentIndex) -> Self { value.0 }
}
