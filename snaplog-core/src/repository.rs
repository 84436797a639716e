//! Concurrent in-memory state keyed by compaction key.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::consumer::{MessageConsumer, text_consumer};
use crate::error::Result;
use crate::message::{Message, TextMessage};

/// Mapping from compaction key to value, safe to mutate from several shard
/// workers at once. There is no persistence; state is rebuilt from the log
/// or from a snapshot.
pub struct StateRepository<V> {
    entries: DashMap<String, V>,
}

impl<V: Clone> StateRepository<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Atomically replace the value of `key` with `f(current)`; `None`
    /// removes the key. Returns the new value.
    pub fn compute<F>(&self, key: &str, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match f(Some(occupied.get())) {
                Some(value) => {
                    occupied.insert(value.clone());
                    Some(value)
                }
                None => {
                    occupied.remove();
                    None
                }
            },
            Entry::Vacant(vacant) => {
                let value = f(None)?;
                vacant.insert(value.clone());
                Some(value)
            }
        }
    }

    /// Put or remove by the message's compaction key.
    pub fn apply(&self, message: &Message<V>) {
        let key = message.key().compaction_key();
        match message.payload() {
            Some(value) => {
                self.put(key, value.clone());
            }
            None => {
                self.remove(key);
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// All entries ordered by key.
    pub fn entries(&self) -> Vec<(String, V)> {
        let mut entries: Vec<(String, V)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<V: Clone> Default for StateRepository<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for StateRepository<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRepository")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// A consumer storing undecoded payloads into `repository`.
pub fn repository_consumer(
    repository: Arc<StateRepository<String>>,
    key_pattern: &str,
) -> Result<Arc<dyn MessageConsumer>> {
    text_consumer(key_pattern, move |message: &TextMessage| {
        repository.apply(message);
    })
}
