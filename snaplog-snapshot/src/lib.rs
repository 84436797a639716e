//! Snapshots and compaction for snaplog channels.
//!
//! A snapshot is a single-entry zip archive holding one JSON document:
//!
//! ```json
//! {
//!   "startSequenceNumbers": [{"shard": "shard-000000", "sequenceNumber": "42"}],
//!   "data": {"key-1": "payload", "key-2": null}
//! }
//! ```
//!
//! The positions section always precedes the data section, and readers
//! stream the data section in document order.
//!
//! # Key Types
//!
//! - [`SnapshotWriter`] / [`SnapshotReader`] - generate locally, then upload; download, then parse
//! - [`BlobStore`] / [`ObjectBlobStore`] - object storage backed by `object_store`
//! - [`SnapshotEventSource`] - replays the latest snapshot as messages
//! - [`CompactionService`] - snapshot + live log into a new snapshot, with retention

pub mod compaction;
pub mod config;
pub mod error;
pub mod format;
pub mod naming;
pub mod reader;
pub mod source;
pub mod store;
pub mod writer;

pub use compaction::CompactionService;
pub use config::SnapshotConfig;
pub use error::{Result, SnapshotError};
pub use format::{CollectedSnapshot, SnapshotHandler, read_archive, write_archive};
pub use naming::{is_snapshot_of, latest_snapshot_name, snapshot_name, snapshot_prefix, snapshot_timestamp};
pub use reader::SnapshotReader;
pub use source::SnapshotEventSource;
pub use store::{BlobStore, ObjectBlobStore};
pub use writer::SnapshotWriter;
