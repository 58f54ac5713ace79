use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Processing => write!(f, "processing"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of one job, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub filename: String,
    pub total_batches: usize,
    pub processed_batches: usize,
    /// Percentage of batches committed, 0.0 to 100.0.
    pub progress: f64,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn new(job_id: &str, filename: &str, total_batches: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            total_batches,
            processed_batches: 0,
            progress: 0.0,
            state: JobState::Processing,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Counts one more committed batch. Returns false if the job was already
    /// at its total, in which case nothing changes.
    pub(crate) fn increment(&mut self) -> bool {
        if self.processed_batches >= self.total_batches {
            return false;
        }
        self.processed_batches += 1;
        self.recompute_progress();
        true
    }

    /// Replaces the batch count, never below what is already committed.
    pub(crate) fn set_total(&mut self, total_batches: usize) {
        self.total_batches = total_batches.max(self.processed_batches);
        self.recompute_progress();
    }

    pub(crate) fn complete(&mut self) {
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
        self.recompute_progress();
    }

    pub(crate) fn fail(&mut self, error: &str) {
        self.state = JobState::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    fn recompute_progress(&mut self) {
        self.progress = if self.total_batches == 0 {
            if self.state == JobState::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            self.processed_batches as f64 / self.total_batches as f64 * 100.0
        };
    }
}
