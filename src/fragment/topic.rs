//! Subscription filters with single- and multi-level wildcards.

use std::fmt;

/// Topic filter in the usual pub/sub wildcard syntax.
///
/// `+` matches exactly one level and `#`, which must be the final level,
/// matches any remaining levels including none.
///
/// # Examples
///
/// ```
/// use ingestor::fragment::TopicFilter;
///
/// let filter = TopicFilter::new("camera/+/image_json");
/// assert!(filter.matches("camera/cam-1/image_json"));
/// assert!(!filter.matches("camera/cam-1/status"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Wrap a filter expression.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self { Self(filter.into()) }

    /// Borrow the filter expression.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }

    /// Whether `topic` is selected by this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split('/');
        for pattern in self.0.split('/') {
            if pattern == "#" {
                return true;
            }
            match levels.next() {
                Some(level) if pattern == "+" || pattern == level => {}
                _ => return false,
            }
        }
        levels.next().is_none()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
