//! Core types for consuming and compacting shard-partitioned message logs.
//!
//! # Key Types
//!
//! - [`ChannelPosition`] / [`ShardPosition`] - read progress, merged last-observation-wins
//! - [`Message`] / [`Key`] / [`Header`] - the immutable message envelope
//! - [`InterceptorChain`] - channel-matched transform/drop hooks
//! - [`MessageDispatcher`] - explicit `(key pattern, payload type, handler)` registration
//! - [`StateRepository`] - concurrent state keyed by compaction key
//! - [`EventSource`] / [`MessageSender`] - consumption and publishing capabilities
//! - [`CompoundEventSource`] - snapshot replay followed by the live log
//!
//! # Architecture
//!
//! ```text
//! producers ──▶ log ──▶ EventSource ──▶ InterceptorChain ──▶ consumers ──▶ StateRepository
//!                            ▲
//!         snapshot ──────────┘ (CompoundEventSource seeds positions)
//! ```

pub mod compound;
pub mod config;
pub mod consumer;
pub mod duration;
pub mod error;
pub mod interceptor;
pub mod message;
pub mod notification;
pub mod position;
pub mod repository;
pub mod source;
pub mod stop;

// Re-exports
pub use compound::CompoundEventSource;
pub use consumer::{MessageConsumer, MessageDispatcher, consumer, text_consumer};
pub use duration::{ChannelDurationBehind, duration_behind};
pub use error::{Error, Result};
pub use interceptor::{Direction, Interceptor, InterceptorChain, InterceptorRegistry};
pub use message::{Header, Key, Message, TextMessage};
pub use notification::{NotificationBus, SourceNotification, SourceStatus};
pub use position::{ChannelPosition, PositionMarker, ShardPosition};
pub use repository::{StateRepository, repository_consumer};
pub use source::{EventSource, EventSourceBuilder, MessageSender, WorkerState};
pub use stop::StopCondition;
