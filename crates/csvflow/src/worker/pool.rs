use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::batch::Batch;
use crate::config::Settings;
use crate::db::{BatchStore, StoreError};
use crate::error::WorkerError;
use crate::jobs::JobRegistry;
use crate::queue::WorkQueue;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of writer threads, one per injected store.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns one worker per store. Each worker owns its store until it exits.
    ///
    /// # Panics
    /// Panics if `stores` is empty.
    pub fn start<S>(
        settings: &Settings,
        queue: Arc<WorkQueue>,
        registry: Arc<JobRegistry>,
        stores: Vec<S>,
    ) -> Result<Self, WorkerError>
    where
        S: BatchStore + 'static,
    {
        assert!(!stores.is_empty(), "worker pool needs at least one store");
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(stores.len());

        for (worker_id, store) in stores.into_iter().enumerate() {
            let worker = Worker {
                id: worker_id,
                store,
                queue: Arc::clone(&queue),
                registry: Arc::clone(&registry),
                shutdown: Arc::clone(&shutdown),
                backoff: settings.retry_backoff(),
                max_attempts: settings.max_write_attempts,
            };

            let spawned = thread::Builder::new()
                .name(format!("csvflow-worker-{}", worker_id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", worker_id, e);
                    let partial = Self { workers, shutdown };
                    partial.shutdown();
                    partial.wait();
                    return Err(WorkerError::SpawnFailed(e));
                }
            }
        }

        info!("Started {} workers", workers.len());

        Ok(Self { workers, shutdown })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Asks every worker to stop after its current batch.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker<S> {
    id: usize,
    store: S,
    queue: Arc<WorkQueue>,
    registry: Arc<JobRegistry>,
    shutdown: Arc<AtomicBool>,
    backoff: Duration,
    max_attempts: Option<u32>,
}

impl<S: BatchStore> Worker<S> {
    fn run(mut self) {
        let span = tracing::info_span!("worker", worker_id = self.id);
        let _entered = span.enter();

        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            let Some(batch) = self.queue.dequeue_timeout(POLL_INTERVAL) else {
                continue;
            };

            self.handle(batch);
            self.queue.task_done();
        }

        debug!("Worker {} stopped, releasing its store", self.id);
    }

    fn handle(&mut self, batch: Batch) {
        if self
            .registry
            .state_of(&batch.job_id)
            .is_some_and(|state| state.is_terminal())
        {
            debug!(
                "Worker {} discarding batch {} of finished job {}",
                self.id, batch.seq, batch.job_id
            );
            return;
        }

        debug!(
            "Worker {} writing batch {} of job {} ({} records, attempt {})",
            self.id,
            batch.seq,
            batch.job_id,
            batch.len(),
            batch.attempts + 1
        );

        match self.write(&batch) {
            Ok(written) => self.on_committed(&batch, written),
            Err(message) => self.on_write_failed(batch, message),
        }
    }

    /// Runs one transactional write. A failed or panicking write is rolled
    /// back and reported as an error message.
    fn write(&mut self, batch: &Batch) -> Result<usize, String> {
        let store = &mut self.store;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| write_batch(store, batch)));

        let message = match outcome {
            Ok(Ok(written)) => return Ok(written),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => {
                let critical = WorkerError::Critical {
                    worker_id: self.id,
                    message: panic_message(payload.as_ref()),
                };
                error!("{}", critical);
                critical.to_string()
            }
        };

        self.rollback();
        Err(message)
    }

    fn rollback(&mut self) {
        let store = &mut self.store;
        match panic::catch_unwind(AssertUnwindSafe(|| store.rollback())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker {} rollback failed: {}", self.id, e),
            Err(payload) => error!(
                "Worker {} panicked during rollback: {}",
                self.id,
                panic_message(payload.as_ref())
            ),
        }
    }

    fn on_committed(&self, batch: &Batch, written: usize) {
        debug!(
            "Worker {} committed batch {} of job {} ({} rows)",
            self.id, batch.seq, batch.job_id, written
        );

        let Some(status) = self.registry.record_progress(&batch.job_id) else {
            return;
        };

        if !status.is_finished() && status.processed_batches == status.total_batches {
            if let Err(e) = self.registry.mark_completed(&batch.job_id) {
                debug!("Job {} not marked completed: {}", batch.job_id, e);
            }
        }
    }

    fn on_write_failed(&self, mut batch: Batch, message: String) {
        batch.attempts += 1;

        if let Some(max) = self.max_attempts {
            if batch.attempts >= max {
                error!(
                    "Worker {} giving up on batch {} of job {} after {} attempts: {}",
                    self.id, batch.seq, batch.job_id, batch.attempts, message
                );
                let reason = format!(
                    "Batch {} failed after {} attempts: {}",
                    batch.seq, batch.attempts, message
                );
                if let Err(e) = self.registry.mark_failed(&batch.job_id, &reason) {
                    debug!("Job {} not marked failed: {}", batch.job_id, e);
                }
                return;
            }
        }

        warn!(
            "Worker {} failed to write batch {} of job {} (attempt {}): {}; retrying in {:?}",
            self.id, batch.seq, batch.job_id, batch.attempts, message, self.backoff
        );

        thread::sleep(self.backoff);

        if let Err(e) = self.queue.requeue(batch) {
            error!("Worker {} could not requeue batch: {}", self.id, e);
        }
    }
}

fn write_batch<S: BatchStore>(store: &mut S, batch: &Batch) -> Result<usize, StoreError> {
    store.begin_transaction()?;
    let written = store.bulk_insert(batch)?;
    store.commit()?;
    Ok(written)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
