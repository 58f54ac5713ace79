use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decode::Encoding;

pub const SETTINGS_VERSION: &str = "1.0";

/// Tunables for the ingestion pipeline and its worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    /// Number of workers, and so of store connections.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Records per batch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Capacity of the producer lane of the work queue.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Fixed delay before a failed batch is put back on the queue.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Write attempts per batch before its job is failed. `null` retries forever.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: Option<u32>,
    /// Declared encoding of uploaded files.
    #[serde(default)]
    pub encoding: Encoding,
    /// Extension (without the dot) uploads must carry.
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    /// SQLite file; falls back to `~/.csvflow/data/csvflow.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_version() -> String {
    SETTINGS_VERSION.to_string()
}

fn default_num_workers() -> usize {
    5
}

fn default_chunk_size() -> usize {
    1000
}

fn default_max_queue_size() -> usize {
    10
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_write_attempts() -> Option<u32> {
    Some(5)
}

fn default_file_extension() -> String {
    "csv".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            num_workers: default_num_workers(),
            chunk_size: default_chunk_size(),
            max_queue_size: default_max_queue_size(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_write_attempts: default_max_write_attempts(),
            encoding: Encoding::default(),
            file_extension: default_file_extension(),
            database_path: None,
        }
    }
}

impl Settings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}
