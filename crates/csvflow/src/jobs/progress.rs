//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::status::{JobState, JobStatus};

/// Progress event for a job, emitted on every registry mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Uploaded filename.
    pub filename: String,
    /// Job state after the mutation.
    pub state: JobState,
    pub processed_batches: usize,
    pub total_batches: usize,
    /// Percentage of batches committed.
    pub progress: f64,
    /// Human-readable description of what changed.
    pub message: String,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    pub fn from_status(status: &JobStatus, message: &str) -> Self {
        Self {
            job_id: status.job_id.clone(),
            filename: status.filename.clone(),
            state: status.state,
            processed_batches: status.processed_batches,
            total_batches: status.total_batches,
            progress: status.progress,
            message: message.to_string(),
            error: status.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl ProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
