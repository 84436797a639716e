//! The snapshot document and its single-entry zip container.
//!
//! ```text
//! {
//!   "startSequenceNumbers": [ { "shard": "shard-000000", "sequenceNumber": "42" }, ... ],
//!   "data": { "<compaction key>": "<payload>" | null, ... }
//! }
//! ```
//!
//! Positions are always written before data, and the reader requires that
//! order: it hands positions to its handler before streaming the first
//! entry, without buffering the document. An empty or missing
//! `sequenceNumber` is the horizon.

use std::fmt;
use std::io::{BufReader, BufWriter, Read, Seek, Write};

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use snaplog_core::{ChannelPosition, PositionMarker, ShardPosition};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, SnapshotError};

const POSITIONS_FIELD: &str = "startSequenceNumbers";
const DATA_FIELD: &str = "data";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SequenceNumber {
    shard: String,
    #[serde(default)]
    sequence_number: Option<String>,
}

fn to_sequence_numbers(positions: &ChannelPosition) -> Vec<SequenceNumber> {
    positions
        .positions()
        .map(|p| SequenceNumber {
            shard: p.shard_id().to_string(),
            // Timestamps cannot be expressed as a token; restart from the horizon.
            sequence_number: Some(match p.marker() {
                PositionMarker::At(token) => token.clone(),
                PositionMarker::Horizon | PositionMarker::AtTimestamp(_) => String::new(),
            }),
        })
        .collect()
}

fn to_position(sequence_numbers: Vec<SequenceNumber>) -> ChannelPosition {
    sequence_numbers
        .into_iter()
        .map(|s| match s.sequence_number {
            Some(token) if !token.is_empty() => ShardPosition::at(s.shard, token),
            _ => ShardPosition::horizon(s.shard),
        })
        .collect()
}

/// Write the JSON document, streaming `entries` in order.
pub fn write_document<W, I>(writer: &mut W, positions: &ChannelPosition, entries: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (String, Option<String>)>,
{
    write!(writer, "{{\"{POSITIONS_FIELD}\":")?;
    serde_json::to_writer(&mut *writer, &to_sequence_numbers(positions))?;
    write!(writer, ",\"{DATA_FIELD}\":{{")?;
    for (i, (key, payload)) in entries.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        serde_json::to_writer(&mut *writer, &key)?;
        writer.write_all(b":")?;
        serde_json::to_writer(&mut *writer, &payload)?;
    }
    writer.write_all(b"}}")?;
    Ok(())
}

/// Write a zip archive holding the document as its only entry.
pub fn write_archive<W, I>(
    writer: W,
    entry_name: &str,
    positions: &ChannelPosition,
    entries: I,
) -> Result<W>
where
    W: Write + Seek,
    I: IntoIterator<Item = (String, Option<String>)>,
{
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    {
        let mut buffered = BufWriter::new(&mut zip);
        write_document(&mut buffered, positions, entries)?;
        buffered.flush()?;
    }
    Ok(zip.finish()?)
}

/// Receives a snapshot as it is parsed.
pub trait SnapshotHandler {
    /// Called once, before any entry.
    fn on_positions(&mut self, positions: ChannelPosition) -> Result<()>;

    /// Called per entry in document order. `None` is a tombstone.
    fn on_entry(&mut self, key: String, payload: Option<String>) -> Result<()>;
}

/// Parse a document from `reader`, feeding `handler`.
pub fn read_document<R: Read, H: SnapshotHandler>(reader: R, handler: &mut H) -> Result<()> {
    let mut failure = None;
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let parsed = DocumentSeed {
        handler,
        failure: &mut failure,
    }
    .deserialize(&mut deserializer)
    .and_then(|()| deserializer.end());

    match (parsed, failure) {
        (_, Some(handler_error)) => Err(handler_error),
        (Err(e), None) => Err(SnapshotError::malformed(e.to_string())),
        (Ok(()), None) => Ok(()),
    }
}

/// Parse the single entry of a snapshot archive.
pub fn read_archive<R: Read + Seek, H: SnapshotHandler>(reader: R, handler: &mut H) -> Result<()> {
    let mut archive = ZipArchive::new(reader)?;
    if archive.len() == 0 {
        return Err(SnapshotError::malformed("archive has no entries"));
    }
    let entry = archive.by_index(0)?;
    read_document(BufReader::new(entry), handler)
}

struct DocumentSeed<'a, H> {
    handler: &'a mut H,
    failure: &'a mut Option<SnapshotError>,
}

impl<'de, H: SnapshotHandler> DeserializeSeed<'de> for DocumentSeed<'_, H> {
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, H: SnapshotHandler> Visitor<'de> for DocumentSeed<'_, H> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a snapshot document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let mut positions_seen = false;
        let mut data_seen = false;
        while let Some(field) = map.next_key::<String>()? {
            match field.as_str() {
                POSITIONS_FIELD => {
                    if positions_seen {
                        return Err(de::Error::duplicate_field(POSITIONS_FIELD));
                    }
                    let sequence_numbers: Vec<SequenceNumber> = map.next_value()?;
                    if let Err(e) = self.handler.on_positions(to_position(sequence_numbers)) {
                        *self.failure = Some(e);
                        return Err(de::Error::custom("snapshot handler failed"));
                    }
                    positions_seen = true;
                }
                DATA_FIELD => {
                    if !positions_seen {
                        return Err(de::Error::custom(format!(
                            "`{DATA_FIELD}` appears before `{POSITIONS_FIELD}`"
                        )));
                    }
                    if data_seen {
                        return Err(de::Error::duplicate_field(DATA_FIELD));
                    }
                    map.next_value_seed(DataSeed {
                        handler: &mut *self.handler,
                        failure: &mut *self.failure,
                    })?;
                    data_seen = true;
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        if !positions_seen {
            return Err(de::Error::missing_field(POSITIONS_FIELD));
        }
        if !data_seen {
            return Err(de::Error::missing_field(DATA_FIELD));
        }
        Ok(())
    }
}

struct DataSeed<'a, H> {
    handler: &'a mut H,
    failure: &'a mut Option<SnapshotError>,
}

impl<'de, H: SnapshotHandler> DeserializeSeed<'de> for DataSeed<'_, H> {
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, H: SnapshotHandler> Visitor<'de> for DataSeed<'_, H> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of compaction keys to payloads")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            let payload = match map.next_value::<serde_json::Value>()? {
                serde_json::Value::Null => None,
                serde_json::Value::String(text) => Some(text),
                other => Some(other.to_string()),
            };
            if let Err(e) = self.handler.on_entry(key, payload) {
                *self.failure = Some(e);
                return Err(de::Error::custom("snapshot handler failed"));
            }
        }
        Ok(())
    }
}

/// A handler collecting everything into memory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CollectedSnapshot {
    pub positions: ChannelPosition,
    pub entries: Vec<(String, Option<String>)>,
}

impl SnapshotHandler for CollectedSnapshot {
    fn on_positions(&mut self, positions: ChannelPosition) -> Result<()> {
        self.positions = positions;
        Ok(())
    }

    fn on_entry(&mut self, key: String, payload: Option<String>) -> Result<()> {
        self.entries.push((key, payload));
        Ok(())
    }
}
