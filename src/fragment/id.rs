use derive_more::{Display, From, Into};
use uuid::Uuid;

/// Identifier of one logical item (a single reassembled image).
///
/// Items are named either explicitly by the sender or by a session binding
/// minted for the publishing source.
///
/// # Examples
///
/// ```
/// use ingestor::fragment::ItemId;
/// let id = ItemId::new("capture-7");
/// assert_eq!(id.as_str(), "capture-7");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct ItemId(String);

impl ItemId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Mint a fresh random identifier.
    #[must_use]
    pub fn random() -> Self { Self(Uuid::new_v4().to_string()) }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

/// Identifier of the physical device that published a fragment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Into)]
#[display("{_0}")]
pub struct SourceId(String);

impl SourceId {
    /// Fallback used when neither the topic nor the payload names a source.
    pub const UNKNOWN: &'static str = "unknown";

    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// Borrow the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}
