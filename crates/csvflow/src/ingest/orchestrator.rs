use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};

use crate::batch::{total_batches, Batcher};
use crate::config::Settings;
use crate::decode::Decoder;
use crate::error::{CsvflowError, RegistryError, Result, WorkerError};
use crate::jobs::{JobRegistry, JobStatus};
use crate::queue::WorkQueue;

/// Hex characters of the content digest kept in a job id.
const JOB_ID_HASH_LEN: usize = 16;

/// Derives the job id of an upload: `<filename>_<first 16 hex of sha256>`.
pub fn job_id_for(filename: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", filename, &digest[..JOB_ID_HASH_LEN])
}

/// Accepts uploads and feeds their batches into the work queue.
pub struct Ingestor {
    settings: Settings,
    queue: Arc<WorkQueue>,
    registry: Arc<JobRegistry>,
}

impl Ingestor {
    pub fn new(settings: Settings, queue: Arc<WorkQueue>, registry: Arc<JobRegistry>) -> Self {
        Self {
            settings,
            queue,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Starts ingesting `content` and returns as soon as the job is
    /// registered. Decoding happens on the producer thread.
    ///
    /// Only a wrong file extension or an id that is already registered fail
    /// the call. Problems with the content itself end up as a failed job.
    pub fn ingest(&self, content: Vec<u8>, filename: &str) -> Result<IngestHandle> {
        self.check_extension(filename)?;

        let job_id = job_id_for(filename, &content);
        // Registered with a provisional count; the producer fixes it after
        // its validating pass, before the first batch is enqueued.
        self.registry.create(&job_id, filename, 0)?;

        info!("Ingesting {} ({} bytes) as job {}", filename, content.len(), job_id);

        let producer = Producer {
            job_id: job_id.clone(),
            filename: filename.to_string(),
            settings: self.settings.clone(),
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
        };

        let spawned = thread::Builder::new()
            .name(format!("csvflow-producer-{}", &job_id))
            .spawn(move || producer.run(content));

        match spawned {
            Ok(handle) => Ok(self.handle(job_id, Some(handle))),
            Err(e) => {
                error!("Failed to spawn producer for job {}: {}", job_id, e);
                self.registry
                    .mark_failed(&job_id, &format!("Failed to start producer: {}", e))?;
                Err(WorkerError::SpawnFailed(e).into())
            }
        }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        Ok(self.registry.get(job_id)?)
    }

    pub fn list_statuses(&self) -> HashMap<String, JobStatus> {
        self.registry.list_all()
    }

    fn check_extension(&self, filename: &str) -> Result<()> {
        let expected = self.settings.file_extension.trim_start_matches('.');
        let matches = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(expected));

        if matches {
            Ok(())
        } else {
            warn!("Rejected upload {}: not a .{} file", filename, expected);
            Err(CsvflowError::InvalidFileType {
                filename: filename.to_string(),
                expected: expected.to_string(),
            })
        }
    }

    fn handle(&self, job_id: String, producer: Option<JoinHandle<()>>) -> IngestHandle {
        IngestHandle {
            job_id,
            producer,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Decodes one upload and streams its batches into the queue.
struct Producer {
    job_id: String,
    filename: String,
    settings: Settings,
    queue: Arc<WorkQueue>,
    registry: Arc<JobRegistry>,
}

impl Producer {
    fn run(self, content: Vec<u8>) {
        if let Err(e) = self.produce(content) {
            if let Err(re) = self.registry.mark_failed(&self.job_id, &e.to_string()) {
                debug!("Job {} not marked failed: {}", self.job_id, re);
            }
        }
    }

    fn produce(&self, content: Vec<u8>) -> Result<()> {
        let decoder = Decoder::new(content, self.settings.encoding)?;
        let rows = decoder.count()?;
        let total = total_batches(rows, self.settings.chunk_size);

        self.registry.set_total_batches(&self.job_id, total)?;
        debug!("Job {} has {} rows in {} batches", self.job_id, rows, total);

        if total == 0 {
            self.registry.mark_completed(&self.job_id)?;
            return Ok(());
        }

        let batches = Batcher::new(
            decoder.records(),
            &self.job_id,
            &self.filename,
            self.settings.chunk_size,
        );

        let mut enqueued = 0;
        for batch in batches {
            if self
                .registry
                .state_of(&self.job_id)
                .is_some_and(|state| state.is_terminal())
            {
                debug!(
                    "Job {} finished early, producer stopping after {} batches",
                    self.job_id, enqueued
                );
                return Ok(());
            }

            self.queue.enqueue(batch?)?;
            enqueued += 1;
        }

        debug!("Producer for job {} enqueued {} batches", self.job_id, enqueued);
        Ok(())
    }
}

/// Handle to a running ingest job.
pub struct IngestHandle {
    job_id: String,
    producer: Option<JoinHandle<()>>,
    registry: Arc<JobRegistry>,
}

impl IngestHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest snapshot, without waiting.
    pub fn status(&self) -> Result<JobStatus> {
        Ok(self.registry.get(&self.job_id)?)
    }

    /// Blocks until the job is completed or failed.
    pub fn wait(mut self) -> Result<JobStatus> {
        self.join_producer();
        self.registry
            .wait_for_terminal(&self.job_id, None)
            .ok_or_else(|| RegistryError::NotFound(self.job_id.clone()).into())
    }

    /// Blocks until the job is terminal or `timeout` elapses, then returns
    /// the latest snapshot, which may still be processing.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<JobStatus> {
        self.registry
            .wait_for_terminal(&self.job_id, Some(timeout))
            .ok_or_else(|| RegistryError::NotFound(self.job_id.clone()).into())
    }

    fn join_producer(&mut self) {
        let Some(producer) = self.producer.take() else {
            return;
        };
        if producer.join().is_err() {
            error!("Producer for job {} panicked", self.job_id);
            if let Err(e) = self.registry.mark_failed(&self.job_id, "Producer panicked") {
                debug!("Job {} not marked failed: {}", self.job_id, e);
            }
        }
    }
}

impl std::fmt::Debug for IngestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandle")
            .field("job_id", &self.job_id)
            .field("producer_running", &self.producer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;

    fn csv(rows: usize) -> Vec<u8> {
        let mut out = String::from("FirstName,LastName,Age,Email\n");
        for i in 0..rows {
            out.push_str(&format!("First{i},Last{i},{},user{i}@example.com\n", 20 + i % 40));
        }
        out.into_bytes()
    }

    fn ingestor(chunk_size: usize, queue_size: usize) -> (Ingestor, Arc<WorkQueue>) {
        let settings = Settings {
            chunk_size,
            max_queue_size: queue_size,
            ..Settings::default()
        };
        let queue = Arc::new(WorkQueue::new(queue_size));
        let registry = Arc::new(JobRegistry::new());
        (
            Ingestor::new(settings, Arc::clone(&queue), registry),
            queue,
        )
    }

    #[test]
    fn test_job_id_for() {
        let id = job_id_for("users.csv", b"abc");
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(id, "users.csv_ba7816bf8f01cfea");
        assert_eq!(id, job_id_for("users.csv", b"abc"));
        assert_ne!(id, job_id_for("users.csv", b"abd"));
    }

    #[test]
    fn test_invalid_extension_creates_no_job() {
        let (ingestor, _queue) = ingestor(10, 4);
        let err = ingestor.ingest(csv(3), "users.txt").unwrap_err();
        assert!(matches!(err, CsvflowError::InvalidFileType { .. }));
        assert!(ingestor.list_statuses().is_empty());

        assert!(ingestor.ingest(csv(3), "no_extension").is_err());
        assert!(ingestor.list_statuses().is_empty());
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let (ingestor, _queue) = ingestor(10, 4);
        let handle = ingestor.ingest(csv(0), "USERS.CSV").unwrap();
        assert_eq!(handle.wait().unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_header_only_file_completes_immediately() {
        let (ingestor, queue) = ingestor(10, 4);
        let handle = ingestor.ingest(csv(0), "empty.csv").unwrap();

        let status = handle.wait().unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.total_batches, 0);
        assert_eq!(status.progress, 100.0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_decode_error_fails_job() {
        let (ingestor, queue) = ingestor(10, 4);
        let content = b"FirstName,LastName,Age,Email\nAda,Lovelace,old,ada@x\n".to_vec();
        let handle = ingestor.ingest(content, "bad.csv").unwrap();

        let status = handle.wait().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("old"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_missing_column_fails_job() {
        let (ingestor, _queue) = ingestor(10, 4);
        let content = b"FirstName,LastName,Email\nAda,Lovelace,ada@x\n".to_vec();
        let status = ingestor.ingest(content, "bad.csv").unwrap().wait().unwrap();
        assert_eq!(status.state, JobState::Failed);
    }

    #[test]
    fn test_duplicate_upload_rejected() {
        let (ingestor, _queue) = ingestor(10, 4);
        ingestor.ingest(csv(0), "users.csv").unwrap();

        let err = ingestor.ingest(csv(0), "users.csv").unwrap_err();
        assert!(matches!(
            err,
            CsvflowError::Registry(RegistryError::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_producer_enqueues_all_batches() {
        let (ingestor, queue) = ingestor(10, 8);
        let handle = ingestor.ingest(csv(25), "users.csv").unwrap();

        let mut sizes = Vec::new();
        for _ in 0..3 {
            let batch = queue.dequeue_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(batch.job_id, handle.job_id());
            sizes.push((batch.seq, batch.len()));
            queue.task_done();
        }
        sizes.sort();
        assert_eq!(sizes, vec![(0, 10), (1, 10), (2, 5)]);

        let status = handle.status().unwrap();
        assert_eq!(status.total_batches, 3);
        assert_eq!(status.state, JobState::Processing);
    }

    #[test]
    fn test_job_is_visible_before_decoding_finishes() {
        let (ingestor, queue) = ingestor(1, 1);
        let handle = ingestor.ingest(csv(5), "slow.csv").unwrap();

        let status = ingestor.get_status(handle.job_id()).unwrap();
        assert_eq!(status.state, JobState::Processing);
        assert_eq!(status.processed_batches, 0);

        for seq in 0..5 {
            let batch = queue.dequeue_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(batch.seq, seq);
            queue.task_done();
        }
        assert_eq!(handle.status().unwrap().total_batches, 5);
    }

    #[test]
    fn test_ingest_does_not_decode_on_the_calling_thread() {
        let (ingestor, queue) = ingestor(10, 4);
        let content = b"not,a,users,file\n1,2,3,4\n".to_vec();
        let handle = ingestor.ingest(content, "odd.csv").unwrap();

        // Content problems surface through the job, never through the call.
        let status = handle.wait().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let (ingestor, _queue) = ingestor(10, 4);
        let err = ingestor.get_status("missing.csv_0000").unwrap_err();
        assert!(matches!(err, CsvflowError::Registry(RegistryError::NotFound(_))));
    }
}
