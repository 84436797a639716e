//! Configuration for log consumers, the publisher and queues.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snaplog_core::{Error, Result};

/// Hard cap on entries per put call.
pub const MAX_ENTRIES_PER_PUT: usize = 500;

/// Hard cap on aggregate entry bytes per put call (5 MiB).
pub const MAX_BYTES_PER_PUT: usize = 5 * 1024 * 1024;

/// Configuration for shard workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Records requested per fetch.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Sleep between fetches that returned nothing.
    #[serde(default = "default_idle_interval", with = "humantime_serde")]
    pub idle_interval: Duration,

    /// Retries of a failing fetch before the worker fails.
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,

    /// Delay between fetch retries.
    #[serde(default = "default_fetch_retry_delay", with = "humantime_serde")]
    pub fetch_retry_delay: Duration,
}

fn default_fetch_limit() -> usize {
    1000
}

fn default_idle_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_fetch_retries() -> u32 {
    5
}

fn default_fetch_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fetch_limit: default_fetch_limit(),
            idle_interval: default_idle_interval(),
            max_fetch_retries: default_max_fetch_retries(),
            fetch_retry_delay: default_fetch_retry_delay(),
        }
    }
}

impl ConsumerConfig {
    #[must_use]
    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit.max(1);
        self
    }

    #[must_use]
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_fetch_retries(mut self, retries: u32) -> Self {
        self.max_fetch_retries = retries;
        self
    }

    #[must_use]
    pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }
}

/// Configuration for the batching publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Entries per chunk.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Aggregate entry bytes per chunk.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Resends of failed entries before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between resends.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
}

fn default_max_entries() -> usize {
    MAX_ENTRIES_PER_PUT
}

fn default_max_bytes() -> usize {
    MAX_BYTES_PER_PUT
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(200)
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl PublisherConfig {
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Reject caps of zero or above the backend limits.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 || self.max_entries > MAX_ENTRIES_PER_PUT {
            return Err(Error::Config(format!(
                "max_entries must be between 1 and {MAX_ENTRIES_PER_PUT}, got {}",
                self.max_entries
            )));
        }
        if self.max_bytes == 0 || self.max_bytes > MAX_BYTES_PER_PUT {
            return Err(Error::Config(format!(
                "max_bytes must be between 1 and {MAX_BYTES_PER_PUT}, got {}",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

/// Configuration for queue sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Long-poll wait per receive.
    #[serde(default = "default_wait_time", with = "humantime_serde")]
    pub wait_time: Duration,

    /// How long a received message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout", with = "humantime_serde")]
    pub visibility_timeout: Duration,

    /// Messages per receive.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Retries of a failing send or receive.
    #[serde(default = "default_queue_max_retries")]
    pub max_retries: u32,

    /// Delay between queue retries.
    #[serde(default = "default_queue_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
}

fn default_wait_time() -> Duration {
    Duration::from_secs(1)
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_messages() -> usize {
    10
}

fn default_queue_max_retries() -> u32 {
    5
}

fn default_queue_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            wait_time: default_wait_time(),
            visibility_timeout: default_visibility_timeout(),
            max_messages: default_max_messages(),
            max_retries: default_queue_max_retries(),
            retry_delay: default_queue_retry_delay(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    #[must_use]
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}
