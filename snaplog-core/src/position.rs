//! Read progress per shard and per channel.
//!
//! Markers are backend-opaque tokens, so positions are never compared
//! numerically. [`ChannelPosition::merge`] is a last-observation-wins union:
//! the caller passes the fresher observation as the overriding operand.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where in a shard consumption has progressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PositionMarker {
    /// Start of the shard, nothing consumed yet.
    Horizon,
    /// Consumed up to and including the record with this sequence token.
    At(String),
    /// Consume records that arrived at or after this instant.
    AtTimestamp(DateTime<Utc>),
}

/// Read progress of a single shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPosition {
    shard_id: String,
    marker: PositionMarker,
}

impl ShardPosition {
    /// Position at the start of the shard.
    pub fn horizon(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            marker: PositionMarker::Horizon,
        }
    }

    /// Position after the record with the given sequence token.
    ///
    /// An empty token is the horizon.
    pub fn at(shard_id: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        let marker = if token.is_empty() {
            PositionMarker::Horizon
        } else {
            PositionMarker::At(token)
        };
        Self {
            shard_id: shard_id.into(),
            marker,
        }
    }

    /// Position at the first record arriving at or after `timestamp`.
    pub fn at_timestamp(shard_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            shard_id: shard_id.into(),
            marker: PositionMarker::AtTimestamp(timestamp),
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn marker(&self) -> &PositionMarker {
        &self.marker
    }

    /// The sequence token, if this position points at a record.
    pub fn token(&self) -> Option<&str> {
        match &self.marker {
            PositionMarker::At(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_horizon(&self) -> bool {
        self.marker == PositionMarker::Horizon
    }
}

impl fmt::Display for ShardPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.marker {
            PositionMarker::Horizon => write!(f, "{}@horizon", self.shard_id),
            PositionMarker::At(token) => write!(f, "{}@{}", self.shard_id, token),
            PositionMarker::AtTimestamp(ts) => write!(f, "{}@{}", self.shard_id, ts.to_rfc3339()),
        }
    }
}

/// Read progress of every known shard of a channel, one entry per shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPosition {
    shards: BTreeMap<String, ShardPosition>,
}

impl ChannelPosition {
    /// A position without any known shard.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a position from shard positions. Later entries for the same
    /// shard replace earlier ones.
    pub fn of(positions: impl IntoIterator<Item = ShardPosition>) -> Self {
        let shards = positions
            .into_iter()
            .map(|p| (p.shard_id.clone(), p))
            .collect();
        Self { shards }
    }

    /// Horizon for every given shard.
    pub fn from_horizon<S: Into<String>>(shard_ids: impl IntoIterator<Item = S>) -> Self {
        Self::of(shard_ids.into_iter().map(ShardPosition::horizon))
    }

    /// Position of `shard_id`, defaulting to the horizon when unknown.
    pub fn shard(&self, shard_id: &str) -> ShardPosition {
        self.shards
            .get(shard_id)
            .cloned()
            .unwrap_or_else(|| ShardPosition::horizon(shard_id))
    }

    pub fn contains(&self, shard_id: &str) -> bool {
        self.shards.contains_key(shard_id)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &str> {
        self.shards.keys().map(String::as_str)
    }

    pub fn positions(&self) -> impl Iterator<Item = &ShardPosition> {
        self.shards.values()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// A new position with `position` replacing the entry for its shard.
    #[must_use]
    pub fn with(&self, position: ShardPosition) -> Self {
        let mut shards = self.shards.clone();
        shards.insert(position.shard_id.clone(), position);
        Self { shards }
    }

    /// Union of both positions; for shards present in both, `newer` wins.
    #[must_use]
    pub fn merge(&self, newer: &ChannelPosition) -> Self {
        let mut shards = self.shards.clone();
        for (shard_id, position) in &newer.shards {
            shards.insert(shard_id.clone(), position.clone());
        }
        Self { shards }
    }
}

/// Merge two channel positions, `b` being the newer observation.
pub fn merge(a: &ChannelPosition, b: &ChannelPosition) -> ChannelPosition {
    a.merge(b)
}

impl FromIterator<ShardPosition> for ChannelPosition {
    fn from_iter<I: IntoIterator<Item = ShardPosition>>(iter: I) -> Self {
        Self::of(iter)
    }
}

impl fmt::Display for ChannelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.shards.values().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
