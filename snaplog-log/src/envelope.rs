//! JSON wire envelope for messages on logs and queues.
//!
//! A record's data is an envelope carrying the compaction key, attributes
//! and payload. `null` payload is a tombstone. Records written by foreign
//! producers that are not envelopes are read as a raw payload keyed by the
//! record's partition key.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snaplog_core::{Header, Key, Result, TextMessage};

use crate::traits::PutEntry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compaction_key: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    payload: Option<String>,
}

/// Encode a message body. Only the key, attributes and payload travel; the
/// arrival timestamp and shard position are assigned by the backend.
pub fn encode_body(message: &TextMessage) -> Result<String> {
    let key = message.key();
    let envelope = Envelope {
        partition_key: key.partition_key().to_string(),
        compaction_key: key.is_compound().then(|| key.compaction_key().to_string()),
        attributes: message.header().attributes().clone(),
        payload: message.payload().cloned(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode a message into a log entry.
pub fn encode(message: &TextMessage) -> Result<PutEntry> {
    Ok(PutEntry {
        partition_key: message.key().partition_key().to_string(),
        data: Bytes::from(encode_body(message)?),
    })
}

/// Decode a record body. `fallback_key` keys bodies that are not envelopes.
pub fn decode(body: &[u8], fallback_key: &str, header: Header) -> TextMessage {
    match serde_json::from_slice::<Envelope>(body) {
        Ok(envelope) => {
            let key = match envelope.compaction_key {
                Some(compaction_key) => Key::compound(envelope.partition_key, compaction_key),
                None => Key::of(envelope.partition_key),
            };
            let header = header.with_attributes(envelope.attributes);
            TextMessage::new(key, header, envelope.payload)
        }
        Err(_) => TextMessage::new(
            fallback_key,
            header,
            Some(String::from_utf8_lossy(body).into_owned()),
        ),
    }
}
