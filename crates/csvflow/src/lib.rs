pub mod batch;
pub mod cli;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod queue;
pub mod service;
pub mod worker;

pub use batch::{Batch, Batcher};
pub use cli::{Cli, Commands};
pub use config::{load_settings, Settings};
pub use db::{BatchStore, Database, SqliteStore, StoreError};
pub use decode::{DecodeError, Decoder, Encoding, Record};
pub use error::{
    ConfigError, CsvflowError, LoggingError, RegistryError, Result, WorkerError,
};
pub use ingest::{job_id_for, IngestHandle, Ingestor};
pub use jobs::{JobProgressEvent, JobRegistry, JobState, JobStatus, ProgressBroadcaster};
pub use queue::WorkQueue;
pub use service::IngestService;
pub use worker::WorkerPool;
