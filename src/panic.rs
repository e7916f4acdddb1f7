//! Readable rendering of caught panic payloads.

use std::{any::Any, fmt};

/// Borrowed panic payload that renders as its message.
///
/// `String` and `&'static str` payloads print verbatim; anything else falls
/// back to a placeholder naming the payload as opaque.
///
/// ```
/// use ingestor::panic::format_panic;
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new("assembly exploded");
/// assert_eq!(format_panic(&*payload).to_string(), "assembly exploded");
///
/// let opaque: Box<dyn std::any::Any + Send> = Box::new(7_u8);
/// assert_eq!(format_panic(&*opaque).to_string(), "<non-string panic payload>");
/// ```
#[derive(Clone, Copy)]
pub struct PanicMessage<'a>(&'a (dyn Any + Send));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(text) = self.0.downcast_ref::<String>() {
            f.write_str(text)
        } else if let Some(text) = self.0.downcast_ref::<&'static str>() {
            f.write_str(text)
        } else {
            f.write_str("<non-string panic payload>")
        }
    }
}

impl fmt::Debug for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicMessage").field(&self.to_string()).finish()
    }
}

/// Wrap a payload returned by `catch_unwind` for logging.
#[must_use]
pub fn format_panic(payload: &(dyn Any + Send)) -> PanicMessage<'_> { PanicMessage(payload) }
