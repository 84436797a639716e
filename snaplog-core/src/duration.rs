//! How far behind the head of the log consumption is.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time elapsed between a record's arrival and `now`, zero if it arrived in
/// the future (clock skew).
pub fn duration_behind(arrival: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - arrival).to_std().unwrap_or(Duration::ZERO)
}

/// Per-shard durations behind; the channel is as stale as its slowest shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDurationBehind {
    shards: BTreeMap<String, Duration>,
}

impl ChannelDurationBehind {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy with `shard_id` set to `behind`.
    #[must_use]
    pub fn with(&self, shard_id: impl Into<String>, behind: Duration) -> Self {
        let mut shards = self.shards.clone();
        shards.insert(shard_id.into(), behind);
        Self { shards }
    }

    /// Record the arrival timestamp of the last message read from a shard.
    pub fn record(&mut self, shard_id: &str, arrival: DateTime<Utc>, now: DateTime<Utc>) {
        self.shards
            .insert(shard_id.to_string(), duration_behind(arrival, now));
    }

    /// Record an explicit duration, e.g. zero once a shard is caught up.
    pub fn set(&mut self, shard_id: &str, behind: Duration) {
        self.shards.insert(shard_id.to_string(), behind);
    }

    pub fn shard(&self, shard_id: &str) -> Option<Duration> {
        self.shards.get(shard_id).copied()
    }

    /// Maximum across all shards, zero when no shard is known.
    pub fn duration_behind(&self) -> Duration {
        self.shards.values().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &str> {
        self.shards.keys().map(String::as_str)
    }
}
