//! Test harness for running the ingestion pipeline in isolation.
//!
//! `FlakyStore` stands in for SQLite when a test needs to script write
//! failures; `TestHarness` runs the real SQLite stores against a temporary
//! database file.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use csvflow::{Batch, BatchStore, IngestService, Settings, StoreError};

/// Settings with a short backoff so retries do not slow the suite down.
pub fn fast_settings() -> Settings {
    Settings {
        num_workers: 3,
        chunk_size: 100,
        max_queue_size: 4,
        retry_backoff_ms: 10,
        max_write_attempts: None,
        ..Settings::default()
    }
}

/// What every `FlakyStore` sharing one log has observed.
#[derive(Default)]
pub struct StoreLog {
    committed: Mutex<Vec<Batch>>,
    /// Remaining injected failures, keyed by (job id, batch seq).
    planned_failures: Mutex<HashMap<(String, usize), u32>>,
    /// Write attempts seen, keyed by (job id, batch seq).
    attempts: Mutex<HashMap<(String, usize), u32>>,
    write_delay: Mutex<Option<Duration>>,
}

impl StoreLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `times` writes of batch `seq` of `job_id` fail.
    pub fn fail(&self, job_id: &str, seq: usize, times: u32) {
        self.planned_failures
            .lock()
            .unwrap()
            .insert((job_id.to_string(), seq), times);
    }

    /// Make every write of batch `seq` of `job_id` fail.
    pub fn fail_always(&self, job_id: &str, seq: usize) {
        self.fail(job_id, seq, u32::MAX);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn committed(&self) -> Vec<Batch> {
        self.committed.lock().unwrap().clone()
    }

    /// Committed batches of one job, ordered by seq.
    pub fn committed_for(&self, job_id: &str) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .committed()
            .into_iter()
            .filter(|b| b.job_id == job_id)
            .collect();
        batches.sort_by_key(|b| b.seq);
        batches
    }

    pub fn attempts(&self, job_id: &str, seq: usize) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&(job_id.to_string(), seq))
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, key: &(String, usize)) -> bool {
        let mut planned = self.planned_failures.lock().unwrap();
        match planned.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }
}

/// In-memory `BatchStore` whose writes fail on demand.
pub struct FlakyStore {
    log: Arc<StoreLog>,
    staged: Option<Batch>,
    in_transaction: bool,
}

impl FlakyStore {
    pub fn new(log: &Arc<StoreLog>) -> Self {
        Self {
            log: Arc::clone(log),
            staged: None,
            in_transaction: false,
        }
    }

    /// One store per worker, all sharing `log`.
    pub fn pool(log: &Arc<StoreLog>, count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::new(log)).collect()
    }
}

impl BatchStore for FlakyStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::TransactionInProgress);
        }
        self.in_transaction = true;
        Ok(())
    }

    fn bulk_insert(&mut self, batch: &Batch) -> Result<usize, StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }

        let key = (batch.job_id.clone(), batch.seq);
        *self.log.attempts.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        let delay = *self.log.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self.log.take_failure(&key) {
            return Err(StoreError::Rejected(format!(
                "injected failure for batch {}",
                batch.seq
            )));
        }

        self.staged = Some(batch.clone());
        Ok(batch.len())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        if let Some(batch) = self.staged.take() {
            self.log.committed.lock().unwrap().push(batch);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.in_transaction = false;
        self.staged = None;
        Ok(())
    }
}

/// Runs the pipeline against real SQLite stores in a temp directory.
pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("csvflow.db");
        Self { temp_dir, db_path }
    }

    /// Starts a SQLite-backed service with `settings` pointed at this harness.
    pub fn start(&self, settings: Settings) -> IngestService {
        let settings = Settings {
            database_path: Some(self.db_path.clone()),
            ..settings
        };
        IngestService::start(settings).expect("Failed to start service")
    }
}
