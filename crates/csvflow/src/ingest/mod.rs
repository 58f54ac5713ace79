//! Upload entry point: validates a file, registers its job and streams its
//! batches to the worker pool.

pub mod orchestrator;

pub use orchestrator::{job_id_for, IngestHandle, Ingestor};
