//! Channel-matched interceptors that may transform or drop messages.
//!
//! Interceptors are registered against a channel-name pattern and a
//! direction. A chain runs the matching interceptors in registration order;
//! an interceptor returning `None` drops the message and ends the chain.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::message::TextMessage;

/// Which side of the channel an interceptor applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// A hook that may transform a message or drop it by returning `None`.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, message: TextMessage) -> Option<TextMessage>;
}

impl<F> Interceptor for F
where
    F: Fn(TextMessage) -> Option<TextMessage> + Send + Sync,
{
    fn intercept(&self, message: TextMessage) -> Option<TextMessage> {
        self(message)
    }
}

struct Registration {
    channel_pattern: Regex,
    direction: Direction,
    interceptor: Arc<dyn Interceptor>,
}

/// Registered interceptors, from which per-channel chains are built.
#[derive(Default)]
pub struct InterceptorRegistry {
    registrations: Vec<Registration>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor for channels matching `channel_pattern`.
    ///
    /// The pattern must match the whole channel name.
    pub fn register(
        &mut self,
        channel_pattern: &str,
        direction: Direction,
        interceptor: Arc<dyn Interceptor>,
    ) -> Result<()> {
        let channel_pattern = Regex::new(&format!("^(?:{channel_pattern})$"))?;
        self.registrations.push(Registration {
            channel_pattern,
            direction,
            interceptor,
        });
        Ok(())
    }

    /// The chain of interceptors applying to `channel_name` in `direction`.
    pub fn chain_for(&self, channel_name: &str, direction: Direction) -> InterceptorChain {
        let interceptors = self
            .registrations
            .iter()
            .filter(|r| r.direction == direction && r.channel_pattern.is_match(channel_name))
            .map(|r| Arc::clone(&r.interceptor))
            .collect();
        InterceptorChain { interceptors }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Ordered interceptors for one channel and direction.
///
/// Stateless per message and safe to share between shard workers.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// A chain that passes every message through unchanged.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A chain of the given interceptors, in order.
    pub fn of(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// Run the chain. `None` means the message was dropped.
    pub fn intercept(&self, message: TextMessage) -> Option<TextMessage> {
        let mut current = message;
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            let key = current.key().clone();
            match interceptor.intercept(current) {
                Some(next) => current = next,
                None => {
                    debug!(key = %key, interceptor = index, "Message dropped by interceptor");
                    return None;
                }
            }
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Header, Message};

    fn tag(value: &'static str) -> Arc<dyn Interceptor> {
        Arc::new(move |message: TextMessage| {
            let header = message.header().clone().with_attribute("tag", value);
            Some(message.with_header(header))
        })
    }

    fn drop_all() -> Arc<dyn Interceptor> {
        Arc::new(|_message: TextMessage| -> Option<TextMessage> { None })
    }

    #[test]
    fn empty_chain_passes_message_through() {
        let message = TextMessage::of("k", "v".to_string());
        let result = InterceptorChain::empty().intercept(message.clone());
        assert_eq!(result, Some(message));
    }

    #[test]
    fn interceptors_run_in_registration_order() {
        let mut registry = InterceptorRegistry::new();
        registry.register(".*", Direction::Receive, tag("first")).unwrap();
        registry.register(".*", Direction::Receive, tag("second")).unwrap();

        let chain = registry.chain_for("products", Direction::Receive);
        let result = chain
            .intercept(TextMessage::of("k", "v".to_string()))
            .unwrap();

        // Later interceptors see the output of earlier ones.
        assert_eq!(result.header().attribute("tag"), Some("second"));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn returning_none_drops_message_and_stops_chain() {
        let mut registry = InterceptorRegistry::new();
        registry.register(".*", Direction::Send, drop_all()).unwrap();
        registry.register(".*", Direction::Send, tag("never")).unwrap();

        let chain = registry.chain_for("products", Direction::Send);
        assert!(chain.intercept(TextMessage::of("k", "v".to_string())).is_none());
    }

    #[test]
    fn chain_only_contains_matching_channel_and_direction() {
        let mut registry = InterceptorRegistry::new();
        registry.register("orders-.*", Direction::Receive, drop_all()).unwrap();
        registry.register("products", Direction::Send, drop_all()).unwrap();

        assert_eq!(registry.chain_for("orders-eu", Direction::Receive).len(), 1);
        assert!(registry.chain_for("orders-eu", Direction::Send).is_empty());
        assert!(registry.chain_for("products", Direction::Receive).is_empty());
        // Patterns match the whole name.
        assert!(registry.chain_for("all-orders-eu", Direction::Receive).is_empty());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut registry = InterceptorRegistry::new();
        assert!(registry.register("(", Direction::Send, drop_all()).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn interceptor_can_redact_payload() {
        let redact: Arc<dyn Interceptor> = Arc::new(|message: TextMessage| {
            let (key, header, _) = message.into_parts();
            Some(Message::new(key, header, Some("***".to_string())))
        });
        let chain = InterceptorChain::of(vec![redact]);

        let result = chain
            .intercept(Message::new("k", Header::new(), Some("secret".to_string())))
            .unwrap();
        assert_eq!(result.payload().map(String::as_str), Some("***"));
    }
}
