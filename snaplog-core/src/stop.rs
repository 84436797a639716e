//! Conditions that end a consumption run.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::message::TextMessage;

type Predicate = Arc<dyn Fn(&TextMessage) -> bool + Send + Sync>;

/// When a shard worker should finish.
///
/// The predicate is evaluated for each record read, before interceptors run;
/// the matching record is still dispatched. `caught_up`
/// additionally finishes a worker once its backend reports nothing newer to
/// read.
#[derive(Clone, Default)]
pub struct StopCondition {
    predicate: Option<Predicate>,
    caught_up: bool,
}

impl StopCondition {
    /// Consume until stopped externally or the source is exhausted.
    pub fn never() -> Self {
        Self::default()
    }

    /// Finish once `predicate` returns true for a record.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&TextMessage) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
            caught_up: false,
        }
    }

    /// Finish once the shard has no newer records.
    pub fn caught_up() -> Self {
        Self {
            predicate: None,
            caught_up: true,
        }
    }

    /// Finish at the first record that arrived after `timestamp`.
    ///
    /// Records without an arrival timestamp never match.
    pub fn arrived_after(timestamp: DateTime<Utc>) -> Self {
        Self::when(move |message| {
            message
                .header()
                .arrival_timestamp()
                .is_some_and(|arrival| arrival > timestamp)
        })
    }

    /// The same condition, also finishing once caught up.
    #[must_use]
    pub fn or_caught_up(self) -> Self {
        Self {
            caught_up: true,
            ..self
        }
    }

    /// Whether the worker should finish after `message`.
    pub fn is_met_by(&self, message: &TextMessage) -> bool {
        self.predicate.as_ref().is_some_and(|p| p(message))
    }

    pub fn stops_when_caught_up(&self) -> bool {
        self.caught_up
    }
}

impl fmt::Debug for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopCondition")
            .field("predicate", &self.predicate.is_some())
            .field("caught_up", &self.caught_up)
            .finish()
    }
}
