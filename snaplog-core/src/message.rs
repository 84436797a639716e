//! Immutable message envelope: key, header and optional payload.
//!
//! A message without payload is a tombstone, the deletion marker for its
//! compaction key.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::position::ShardPosition;

/// Message key.
///
/// The partition key governs placement on a shard; the compaction key decides
/// which entries collapse together during compaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Partition key and compaction key are the same value.
    Simple(String),
    /// Distinct partition and compaction keys.
    Compound {
        partition_key: String,
        compaction_key: String,
    },
}

impl Key {
    pub fn of(key: impl Into<String>) -> Self {
        Self::Simple(key.into())
    }

    pub fn compound(partition_key: impl Into<String>, compaction_key: impl Into<String>) -> Self {
        Self::Compound {
            partition_key: partition_key.into(),
            compaction_key: compaction_key.into(),
        }
    }

    pub fn partition_key(&self) -> &str {
        match self {
            Self::Simple(key) => key,
            Self::Compound { partition_key, .. } => partition_key,
        }
    }

    pub fn compaction_key(&self) -> &str {
        match self {
            Self::Simple(key) => key,
            Self::Compound { compaction_key, .. } => compaction_key,
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound { .. })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(key) => f.write_str(key),
            Self::Compound {
                partition_key,
                compaction_key,
            } => write!(f, "{partition_key}:{compaction_key}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::of(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Simple(value)
    }
}

/// Message metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    arrival_timestamp: Option<DateTime<Utc>>,
    attributes: HashMap<String, String>,
    shard_position: Option<ShardPosition>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_arrival_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.arrival_timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[must_use]
    pub fn with_shard_position(mut self, position: ShardPosition) -> Self {
        self.shard_position = Some(position);
        self
    }

    pub fn arrival_timestamp(&self) -> Option<DateTime<Utc>> {
        self.arrival_timestamp
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn shard_position(&self) -> Option<&ShardPosition> {
        self.shard_position.as_ref()
    }
}

/// A keyed message with an optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    key: Key,
    header: Header,
    payload: Option<T>,
}

/// A message whose payload is still in its encoded text form.
pub type TextMessage = Message<String>;

impl<T> Message<T> {
    pub fn new(key: impl Into<Key>, header: Header, payload: Option<T>) -> Self {
        Self {
            key: key.into(),
            header,
            payload,
        }
    }

    /// A message carrying `payload` with an empty header.
    pub fn of(key: impl Into<Key>, payload: T) -> Self {
        Self::new(key, Header::new(), Some(payload))
    }

    /// A deletion marker for `key`.
    pub fn tombstone(key: impl Into<Key>) -> Self {
        Self::new(key, Header::new(), None)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    pub fn into_parts(self) -> (Key, Header, Option<T>) {
        (self.key, self.header, self.payload)
    }

    /// The same message with a different header.
    #[must_use]
    pub fn with_header(self, header: Header) -> Self {
        Self { header, ..self }
    }

    /// The same message with a different payload type.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            key: self.key,
            header: self.header,
            payload: self.payload.map(f),
        }
    }
}

impl<T: Serialize> Message<T> {
    /// Encode the payload to JSON text.
    pub fn encode(&self) -> Result<TextMessage> {
        let payload = self
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Message {
            key: self.key.clone(),
            header: self.header.clone(),
            payload,
        })
    }
}

impl TextMessage {
    /// Decode the JSON payload into `T`. Tombstones decode to tombstones.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Message<T>> {
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Message {
            key: self.key.clone(),
            header: self.header.clone(),
            payload,
        })
    }

    /// Encoded size in bytes of key and payload.
    pub fn size_bytes(&self) -> usize {
        self.key.partition_key().len() + self.payload.as_ref().map_or(0, String::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        price: u32,
    }

    #[test]
    fn simple_key_uses_same_value_for_both_roles() {
        let key = Key::of("p-1");
        assert_eq!(key.partition_key(), "p-1");
        assert_eq!(key.compaction_key(), "p-1");
        assert!(!key.is_compound());
    }

    #[test]
    fn compound_key_separates_partition_and_compaction() {
        let key = Key::compound("customer-7", "order-3");
        assert_eq!(key.partition_key(), "customer-7");
        assert_eq!(key.compaction_key(), "order-3");
        assert_eq!(key.to_string(), "customer-7:order-3");
    }

    #[test]
    fn tombstone_has_no_payload() {
        let message: TextMessage = Message::tombstone("gone");
        assert!(message.is_tombstone());
        assert_eq!(message.key().compaction_key(), "gone");
    }

    #[test]
    fn header_builders_do_not_share_state() {
        let base = Header::new().with_attribute("a", "1");
        let extended = base.clone().with_attribute("b", "2");

        assert_eq!(base.attributes().len(), 1);
        assert_eq!(extended.attribute("b"), Some("2"));
    }

    #[test]
    fn encode_then_decode_preserves_typed_payload() {
        let product = Product {
            name: "lamp".to_string(),
            price: 42,
        };
        let message = Message::of("p-1", product.clone());

        let text = message.encode().unwrap();
        let decoded: Message<Product> = text.decode().unwrap();

        assert_eq!(decoded.payload(), Some(&product));
        assert_eq!(decoded.key(), &Key::of("p-1"));
    }

    #[test]
    fn decode_fails_for_mismatched_payload_type() {
        let text = TextMessage::of("k", "\"just a string\"".to_string());
        assert!(text.decode::<Product>().is_err());
    }

    #[test]
    fn tombstone_decodes_to_tombstone() {
        let text: TextMessage = Message::tombstone("k");
        let decoded: Message<Product> = text.decode().unwrap();
        assert!(decoded.is_tombstone());
    }
}
