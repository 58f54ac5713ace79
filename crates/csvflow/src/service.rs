//! Wires the database, queue, registry, worker pool and ingestor together.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::broadcast;

use crate::config::Settings;
use crate::db::{BatchStore, Database};
use crate::error::{ConfigError, Result};
use crate::ingest::{IngestHandle, Ingestor};
use crate::jobs::{JobProgressEvent, JobRegistry, JobStatus, ProgressBroadcaster};
use crate::queue::WorkQueue;
use crate::worker::WorkerPool;

/// A running ingestion service.
pub struct IngestService {
    database: Option<Database>,
    queue: Arc<WorkQueue>,
    events: ProgressBroadcaster,
    ingestor: Ingestor,
    pool: WorkerPool,
}

impl IngestService {
    /// Opens (and migrates) the configured SQLite database and starts one
    /// worker per `num_workers`, each with its own connection.
    pub fn start(settings: Settings) -> Result<Self> {
        let path = settings
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "No databasePath configured and no home directory found".to_string(),
            })?;

        let database = Database::open(&path)?;
        let stores = database.open_stores(settings.num_workers)?;

        let mut service = Self::with_stores(settings, stores)?;
        service.database = Some(database);
        Ok(service)
    }

    /// Starts the pipeline over caller-provided stores, one worker each.
    pub fn with_stores<S>(settings: Settings, stores: Vec<S>) -> Result<Self>
    where
        S: BatchStore + 'static,
    {
        let events = ProgressBroadcaster::default();
        let queue = Arc::new(WorkQueue::new(settings.max_queue_size));
        let registry = Arc::new(JobRegistry::with_broadcaster(events.clone()));

        let pool = WorkerPool::start(&settings, Arc::clone(&queue), Arc::clone(&registry), stores)?;
        let ingestor = Ingestor::new(settings, Arc::clone(&queue), registry);

        Ok(Self {
            database: None,
            queue,
            events,
            ingestor,
            pool,
        })
    }

    pub fn ingest(&self, content: Vec<u8>, filename: &str) -> Result<IngestHandle> {
        self.ingestor.ingest(content, filename)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        self.ingestor.get_status(job_id)
    }

    pub fn list_statuses(&self) -> HashMap<String, JobStatus> {
        self.ingestor.list_statuses()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        self.ingestor.registry()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.events.subscribe()
    }

    /// Read handle on the database, when the service opened one itself.
    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// Stops the service. Queued batches are abandoned.
    ///
    /// Closing the queue first releases producers blocked on a full queue.
    /// Jobs still processing once the workers have exited are marked failed
    /// so nobody waits on them forever.
    pub fn shutdown(self) {
        self.queue.close();
        self.pool.shutdown();

        let registry = Arc::clone(self.ingestor.registry());
        self.pool.wait();

        let abandoned = registry.fail_unfinished("Service shut down before the job finished");
        if abandoned > 0 {
            warn!("Shut down with {} unfinished jobs", abandoned);
        } else {
            info!("Ingestion service shut down");
        }
    }
}
