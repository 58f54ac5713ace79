//! In-memory job status registry shared by the producer, the workers and
//! status queries.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::progress::{JobProgressEvent, ProgressBroadcaster};
use super::status::{JobState, JobStatus};
use crate::error::RegistryError;

/// Tracks every job of this process by id.
///
/// All mutations of a job happen under one mutex, so readers always see a
/// whole snapshot and concurrent increments from different workers never
/// interleave. State is lost on restart.
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobStatus>>,
    changed: Condvar,
    events: Option<ProgressBroadcaster>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            events: None,
        }
    }

    /// Creates a registry that publishes a [`JobProgressEvent`] per mutation.
    pub fn with_broadcaster(events: ProgressBroadcaster) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    /// Registers a new job in the `processing` state.
    ///
    /// `total_batches` may be provisional and corrected later with
    /// [`set_total_batches`](Self::set_total_batches).
    pub fn create(
        &self,
        job_id: &str,
        filename: &str,
        total_batches: usize,
    ) -> Result<JobStatus, RegistryError> {
        let status = {
            let mut jobs = self.lock();
            if jobs.contains_key(job_id) {
                return Err(RegistryError::DuplicateJob(job_id.to_string()));
            }
            let status = JobStatus::new(job_id, filename, total_batches);
            jobs.insert(job_id.to_string(), status.clone());
            self.publish(&status, "Job registered");
            status
        };
        self.changed.notify_all();

        log::info!(
            "Registered job {} ({}, {} batches)",
            job_id,
            filename,
            total_batches
        );
        Ok(status)
    }

    /// Fixes the batch count of a job still in `processing`.
    pub fn set_total_batches(
        &self,
        job_id: &str,
        total_batches: usize,
    ) -> Result<JobStatus, RegistryError> {
        let status = {
            let mut jobs = self.lock();
            let job = Self::unfinished(&mut jobs, job_id)?;
            job.set_total(total_batches);
            let status = job.clone();
            self.publish(&status, &format!("Split into {} batches", total_batches));
            status
        };
        self.changed.notify_all();

        log::debug!("Job {} has {} batches", job_id, total_batches);
        Ok(status)
    }

    /// Counts one committed batch for `job_id` and returns the new snapshot.
    ///
    /// Unknown ids are logged and ignored: a retried batch may outlive a
    /// [`reset`](Self::reset).
    pub fn record_progress(&self, job_id: &str) -> Option<JobStatus> {
        let status = {
            let mut jobs = self.lock();
            let Some(job) = jobs.get_mut(job_id) else {
                log::warn!("Progress reported for unknown job {}", job_id);
                return None;
            };
            if !job.increment() {
                log::warn!(
                    "Job {} already has all {} batches committed, ignoring extra progress",
                    job_id,
                    job.total_batches
                );
            }
            let status = job.clone();
            let message = format!(
                "Committed {}/{} batches",
                status.processed_batches, status.total_batches
            );
            self.publish(&status, &message);
            status
        };
        self.changed.notify_all();

        Some(status)
    }

    /// Moves a job to `failed`. Terminal jobs are left untouched.
    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<JobStatus, RegistryError> {
        let status = {
            let mut jobs = self.lock();
            let job = Self::unfinished(&mut jobs, job_id)?;
            job.fail(error);
            let status = job.clone();
            self.publish(&status, "Job failed");
            status
        };
        self.changed.notify_all();

        log::error!("Job {} ({}) failed: {}", job_id, status.filename, error);
        Ok(status)
    }

    /// Moves a job to `completed`. Only valid once every batch is committed.
    pub fn mark_completed(&self, job_id: &str) -> Result<JobStatus, RegistryError> {
        let status = {
            let mut jobs = self.lock();
            let job = Self::unfinished(&mut jobs, job_id)?;
            if job.processed_batches < job.total_batches {
                return Err(RegistryError::Incomplete {
                    job_id: job_id.to_string(),
                    processed: job.processed_batches,
                    total: job.total_batches,
                });
            }
            job.complete();
            let status = job.clone();
            self.publish(&status, "Job completed");
            status
        };
        self.changed.notify_all();

        log::info!(
            "Job {} ({}) completed: {} batches",
            job_id,
            status.filename,
            status.total_batches
        );
        Ok(status)
    }

    /// Fails every job still in `processing` and returns how many there were.
    pub fn fail_unfinished(&self, error: &str) -> usize {
        let failed = {
            let mut jobs = self.lock();
            let mut failed = 0;
            for job in jobs.values_mut().filter(|job| !job.is_finished()) {
                job.fail(error);
                self.publish(job, "Job failed");
                failed += 1;
            }
            failed
        };
        self.changed.notify_all();

        if failed > 0 {
            log::warn!("Failed {} unfinished jobs: {}", failed, error);
        }
        failed
    }

    pub fn get(&self, job_id: &str) -> Result<JobStatus, RegistryError> {
        self.lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn state_of(&self, job_id: &str) -> Option<JobState> {
        self.lock().get(job_id).map(|job| job.state)
    }

    /// Snapshot of every job, keyed by id.
    pub fn list_all(&self) -> HashMap<String, JobStatus> {
        self.lock().clone()
    }

    /// Returns the count of jobs by state: (processing, completed, failed).
    pub fn counts(&self) -> (usize, usize, usize) {
        let jobs = self.lock();
        let mut processing = 0;
        let mut completed = 0;
        let mut failed = 0;

        for job in jobs.values() {
            match job.state {
                JobState::Processing => processing += 1,
                JobState::Completed => completed += 1,
                JobState::Failed => failed += 1,
            }
        }

        (processing, completed, failed)
    }

    /// Blocks until `job_id` reaches a terminal state or `timeout` elapses,
    /// then returns its latest snapshot. `None` means the job is unknown.
    pub fn wait_for_terminal(&self, job_id: &str, timeout: Option<Duration>) -> Option<JobStatus> {
        let still_running = |jobs: &mut HashMap<String, JobStatus>| {
            jobs.get(job_id).is_some_and(|job| !job.is_finished())
        };

        let guard = self.lock();
        let guard = match timeout {
            Some(timeout) => {
                self.changed
                    .wait_timeout_while(guard, timeout, still_running)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => self
                .changed
                .wait_while(guard, still_running)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };

        guard.get(job_id).cloned()
    }

    /// Forgets every job.
    pub fn reset(&self) {
        let mut jobs = self.lock();
        let dropped = jobs.len();
        jobs.clear();
        self.changed.notify_all();
        log::debug!("Job registry reset, dropped {} jobs", dropped);
    }

    /// Sends the event for a mutation. Callers hold the jobs lock, so events
    /// leave in the same order the mutations were applied.
    fn publish(&self, status: &JobStatus, message: &str) {
        if let Some(events) = &self.events {
            events.send(JobProgressEvent::from_status(status, message));
        }
    }

    fn unfinished<'a>(
        jobs: &'a mut HashMap<String, JobStatus>,
        job_id: &str,
    ) -> Result<&'a mut JobStatus, RegistryError> {
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;
        if job.is_finished() {
            return Err(RegistryError::AlreadyFinished {
                job_id: job_id.to_string(),
                state: job.state,
            });
        }
        Ok(job)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobStatus>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
