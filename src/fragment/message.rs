//! Inbound bus messages and their validation into typed fragments.
//!
//! Devices publish JSON objects on topics shaped like
//! `camera/<source-id>/image_json`. [`FragmentMessage::parse`] turns the raw
//! `(topic, payload)` pair into a validated [`FragmentMessage`]; anything
//! that fails validation is a [`MessageError`] and is dropped by the
//! pipeline without retry.

use std::num::NonZeroU32;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FragmentIndex, ItemId, SourceId};

/// One message as delivered by the bus subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl BusMessage {
    /// Construct a message from its topic and payload.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// JSON body published by devices for each fragment.
///
/// Fields are optional at this layer so validation can report precisely
/// which one is missing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentPayload {
    /// Source identifier, used when the topic does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Explicit logical item identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    /// Zero-based fragment position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    /// Declared fragment count for the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
    /// Base64-encoded fragment bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Reasons an inbound message is rejected as malformed.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The payload is not a JSON object of the expected shape.
    #[error("payload is not a valid fragment object: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// The fragment index is negative or does not fit in `u32`.
    #[error("invalid fragment index {0}")]
    InvalidIndex(i64),
    /// The declared total is not a positive `u32`.
    #[error("invalid fragment total {0}")]
    InvalidTotal(i64),
}

/// A validated fragment ready for the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentMessage {
    /// Topic the fragment arrived on.
    pub topic: String,
    /// Physical source that published the fragment.
    pub source: SourceId,
    /// Explicit item identifier, when the sender supplied one.
    pub item: Option<ItemId>,
    /// Position of this fragment within its item.
    pub index: FragmentIndex,
    /// Fragment count declared by this message.
    pub total: NonZeroU32,
    /// Encoded fragment payload, stored verbatim.
    pub data: String,
}

impl FragmentMessage {
    /// Validate a bus message into a typed fragment.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] when the payload is not JSON, a required
    /// field is missing, or `index`/`total` are out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use ingestor::fragment::{BusMessage, FragmentMessage};
    ///
    /// let msg = BusMessage::new(
    ///     "camera/cam-1/image_json",
    ///     r#"{"index":0,"total":2,"data":"AAEC"}"#,
    /// );
    /// let fragment = FragmentMessage::parse(&msg).expect("valid fragment");
    /// assert_eq!(fragment.source.as_str(), "cam-1");
    /// assert!(fragment.item.is_none());
    /// ```
    pub fn parse(message: &BusMessage) -> Result<Self, MessageError> {
        let payload: FragmentPayload = serde_json::from_slice(&message.payload)?;

        let index = payload.index.ok_or(MessageError::MissingField("index"))?;
        let index = u32::try_from(index)
            .map(FragmentIndex::new)
            .map_err(|_| MessageError::InvalidIndex(index))?;

        let total = payload.total.ok_or(MessageError::MissingField("total"))?;
        let total = u32::try_from(total)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(MessageError::InvalidTotal(total))?;

        let data = payload.data.ok_or(MessageError::MissingField("data"))?;
        let item = payload
            .image_id
            .filter(|id| !id.is_empty())
            .map(ItemId::from);
        let source = resolve_source(&message.topic, payload.id.as_ref());

        Ok(Self {
            topic: message.topic.clone(),
            source,
            item,
            index,
            total,
            data,
        })
    }
}

/// Pick the source id from a three-segment topic, else from the payload.
fn resolve_source(topic: &str, payload_id: Option<&serde_json::Value>) -> SourceId {
    let mut segments = topic.split('/');
    if let (Some(_), Some(source), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) && !source.is_empty()
    {
        return SourceId::from(source);
    }

    match payload_id {
        Some(serde_json::Value::String(id)) if !id.is_empty() => SourceId::from(id.as_str()),
        Some(serde_json::Value::Number(id)) => SourceId::new(id.to_string()),
        _ => SourceId::from(SourceId::UNKNOWN),
    }
}
