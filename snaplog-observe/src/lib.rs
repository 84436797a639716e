//! Observability for snaplog.
//!
//! This crate provides:
//! - Global `tracing` subscriber setup with optional OpenTelemetry span export
//! - A background task logging source status notifications

pub mod notifications;
pub mod tracer;

pub use notifications::{level_for, log_notification, spawn_notification_logger};
pub use tracer::{LogFormat, TracerConfig, TracerError, TracingGuard, init_tracing};
