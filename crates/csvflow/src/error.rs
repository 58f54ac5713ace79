use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::JobState;

#[derive(Error, Debug)]
pub enum CsvflowError {
    #[error("Invalid file type '{filename}': expected a .{expected} file")]
    InvalidFileType { filename: String, expected: String },

    #[error("Decode error: {0}")]
    Decode(#[from] crate::decode::DecodeError),

    #[error("Job registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] crate::db::StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("Failed to read input file '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job '{0}' already exists")]
    DuplicateJob(String),

    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{job_id}' is already {state}")]
    AlreadyFinished { job_id: String, state: JobState },

    #[error("Job '{job_id}' has only {processed} of {total} batches committed")]
    Incomplete {
        job_id: String,
        processed: usize,
        total: usize,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Work queue closed unexpectedly")]
    ChannelClosed,

    #[error("Work queue shut down")]
    QueueShutDown,

    #[error("Critical error in worker {worker_id}: {message}")]
    Critical { worker_id: usize, message: String },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install log bridge: {0}")]
    SetLogger(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T> = std::result::Result<T, CsvflowError>;
