//! Snapshot object names.
//!
//! `compaction-<channel>-snapshot-<yyyy-MM-ddTHH-mm+zzzz>-<uuid>.json.zip`
//!
//! Timestamps are always UTC, so lexical order of names of one channel is
//! time order. The newest snapshot is chosen by name, never by store
//! metadata.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M";
const SUFFIX: &str = ".json.zip";

/// Prefix shared by all snapshots of `channel`.
pub fn snapshot_prefix(channel: &str) -> String {
    format!("compaction-{channel}-snapshot-")
}

/// A fresh snapshot name for `channel` taken at `timestamp`.
pub fn snapshot_name(channel: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}{}-{}{SUFFIX}",
        snapshot_prefix(channel),
        timestamp.format(TIMESTAMP_FORMAT),
        timestamp.format("%z"),
        Uuid::new_v4()
    )
}

/// The timestamp encoded in a snapshot name of `channel`, or `None` if
/// `name` is not one.
pub fn snapshot_timestamp(channel: &str, name: &str) -> Option<DateTime<Utc>> {
    let rest = name
        .strip_prefix(&snapshot_prefix(channel))?
        .strip_suffix(SUFFIX)?;
    // "2024-01-31T09-05" + "+0000"
    let (stamp, disambiguator) = (rest.get(..16)?, rest.get(16..)?);
    let (zone, disambiguator) = (disambiguator.get(..5)?, disambiguator.get(5..)?);
    if zone != "+0000" || !disambiguator.starts_with('-') || disambiguator.len() < 2 {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{stamp}-00"), "%Y-%m-%dT%H-%M-%S")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn is_snapshot_of(channel: &str, name: &str) -> bool {
    snapshot_timestamp(channel, name).is_some()
}

/// The newest snapshot of `channel` among `names`.
pub fn latest_snapshot_name<I, S>(channel: &str, names: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter(|n| is_snapshot_of(channel, n.as_ref()))
        .map(|n| n.as_ref().to_string())
        .max()
}
