//! Job status tracking and progress event streaming.

pub mod progress;
pub mod registry;
pub mod status;

pub use progress::{JobProgressEvent, ProgressBroadcaster};
pub use registry::JobRegistry;
pub use status::{JobState, JobStatus};
