//! Configuration for snapshot storage.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where snapshots live and how they are transferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Bucket holding the snapshots of every channel.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Directory for temporary snapshot files. Defaults to a directory
    /// under the user cache dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Files of at least this many bytes are uploaded in parts.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Size of each uploaded part.
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

fn default_bucket() -> String {
    "snaplog-snapshots".to_string()
}

fn default_multipart_threshold() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_part_size() -> usize {
    100 * 1024 * 1024
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            temp_dir: None,
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
        }
    }
}

impl SnapshotConfig {
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_multipart(mut self, threshold: u64, part_size: usize) -> Self {
        self.multipart_threshold = threshold;
        self.part_size = part_size.max(1);
        self
    }

    /// The configured temp directory, or `<cache dir>/snaplog/snapshots`,
    /// or the OS temp dir when there is no cache dir.
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("snaplog").join("snapshots"))
                .unwrap_or_else(std::env::temp_dir)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snaplog_core::config::from_toml_str;

    #[test]
    fn defaults_use_five_gib_threshold_and_hundred_mib_parts() {
        let config = SnapshotConfig::default();
        assert_eq!(config.bucket, "snaplog-snapshots");
        assert_eq!(config.multipart_threshold, 5 * 1024 * 1024 * 1024);
        assert_eq!(config.part_size, 100 * 1024 * 1024);
    }

    #[test]
    fn explicit_temp_dir_wins() {
        let config = SnapshotConfig::default().with_temp_dir("/var/tmp/snaps");
        assert_eq!(config.resolved_temp_dir(), PathBuf::from("/var/tmp/snaps"));
    }

    #[test]
    fn loads_from_toml() {
        let config: SnapshotConfig =
            from_toml_str("bucket = \"compactions\"\npart_size = 1024\n").unwrap();
        assert_eq!(config.bucket, "compactions");
        assert_eq!(config.part_size, 1024);
        assert!(config.temp_dir.is_none());
    }
}
