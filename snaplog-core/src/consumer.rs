//! Explicit consumer registration and fan-out dispatch.
//!
//! Consumers are `(key pattern, payload type, handler)` triples built at
//! composition time. Dispatch delivers a message to every consumer whose key
//! pattern matches and whose payload type decodes the payload.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::Result;
use crate::message::{Message, TextMessage};

/// Something that receives dispatched messages.
pub trait MessageConsumer: Send + Sync {
    /// Pattern the message key must match.
    fn key_pattern(&self) -> &Regex;

    /// Handle a message whose key matched. Returns `false` if the payload was
    /// not of the consumer's type and the message was skipped.
    fn accept(&self, message: &TextMessage) -> bool;
}

/// A consumer decoding JSON payloads into `T` before calling its handler.
pub struct TypedConsumer<T, F> {
    key_pattern: Regex,
    handler: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> MessageConsumer for TypedConsumer<T, F>
where
    T: DeserializeOwned,
    F: Fn(Message<T>) + Send + Sync,
{
    fn key_pattern(&self) -> &Regex {
        &self.key_pattern
    }

    fn accept(&self, message: &TextMessage) -> bool {
        match message.decode::<T>() {
            Ok(decoded) => {
                (self.handler)(decoded);
                true
            }
            Err(e) => {
                trace!(key = %message.key(), error = %e, "Payload does not match consumer type");
                false
            }
        }
    }
}

/// A consumer receiving payloads in their encoded text form.
pub struct TextConsumer<F> {
    key_pattern: Regex,
    handler: F,
}

impl<F> MessageConsumer for TextConsumer<F>
where
    F: Fn(&TextMessage) + Send + Sync,
{
    fn key_pattern(&self) -> &Regex {
        &self.key_pattern
    }

    fn accept(&self, message: &TextMessage) -> bool {
        (self.handler)(message);
        true
    }
}

fn full_match(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}

/// Build a consumer for payloads of type `T` with keys matching `key_pattern`.
pub fn consumer<T, F>(key_pattern: &str, handler: F) -> Result<Arc<dyn MessageConsumer>>
where
    T: DeserializeOwned + 'static,
    F: Fn(Message<T>) + Send + Sync + 'static,
{
    Ok(Arc::new(TypedConsumer {
        key_pattern: full_match(key_pattern)?,
        handler,
        _payload: PhantomData,
    }))
}

/// Build a consumer receiving undecoded payloads.
pub fn text_consumer<F>(key_pattern: &str, handler: F) -> Result<Arc<dyn MessageConsumer>>
where
    F: Fn(&TextMessage) + Send + Sync + 'static,
{
    Ok(Arc::new(TextConsumer {
        key_pattern: full_match(key_pattern)?,
        handler,
    }))
}

/// Registered consumers of one event source.
#[derive(Default)]
pub struct MessageDispatcher {
    consumers: RwLock<Vec<Arc<dyn MessageConsumer>>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, consumer: Arc<dyn MessageConsumer>) {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    /// Deliver `message` to every matching consumer. Returns how many
    /// consumers accepted it.
    pub fn dispatch(&self, message: &TextMessage) -> usize {
        let consumers = self
            .consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        consumers
            .iter()
            .filter(|c| c.key_pattern().is_match(message.key().compaction_key()))
            .filter(|c| c.accept(message))
            .count()
    }

    pub fn len(&self) -> usize {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("consumers", &self.len())
            .finish()
    }
}
