//! Error types for stepq.
//!
//! [`Error`] covers engine and collaborator failures. Failures raised by job
//! code are [`crate::job::JobError`]s, which carry the retry/ignore
//! classification consumed by the step processor.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("program not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("invalid job data: {0}")]
    InvalidJobData(String),

    #[error("execution time exceeded: {elapsed:?} elapsed, budget {budget:?}")]
    ExecutionTimeExceeded { elapsed: Duration, budget: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
