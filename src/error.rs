use std::path::PathBuf;

use thiserror::Error;

/// Failures of the job subsystem itself. Failures of the denoise operation
/// never surface here; the worker folds them into the job record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} already exists")]
    DuplicateJob(String),

    #[error("no such job {0}")]
    UnknownJob(String),

    #[error("work queue is full")]
    QueueFull,

    #[error("worker is not running")]
    WorkerGone,

    #[error("input location {0:?} has no usable file name")]
    BadLocation(PathBuf),
}
