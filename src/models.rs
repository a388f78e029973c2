use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::CONFIG;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Nlmeans,
    Bilateral,
    Gaussian,
}

impl Method {
    pub fn parse(name: &str) -> Option<Method> {
        match name {
            "nlmeans" => Some(Method::Nlmeans),
            "bilateral" => Some(Method::Bilateral),
            "gaussian" => Some(Method::Gaussian),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DenoiseParams {
    pub strength: u8,
    pub method: Method,
    pub grayscale: bool,
}

impl DenoiseParams {
    /// Strength outside 1..=10 is clamped rather than rejected.
    pub fn new(strength: u8, method: Method, grayscale: bool) -> DenoiseParams {
        DenoiseParams {
            strength: strength.clamp(1, 10),
            method,
            grayscale,
        }
    }
}

#[derive(Clone)]
pub struct Job {
    pub id: String,
    pub status: Status,
    pub filename: String,
    pub created_at: Instant,
    pub process_time: Option<Duration>,
    pub error: Option<String>,
}

/// What the queue hands to the worker: locations and parameters only,
/// never the job record itself.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub params: DenoiseParams,
}

pub enum FileKind {
    Original,
    Processed,
}

pub fn build_path(filename: &str, kind: FileKind) -> PathBuf {
    match kind {
        FileKind::Original => Path::new(CONFIG.upload_dir).join(filename),
        FileKind::Processed => Path::new(CONFIG.processed_dir).join(filename),
    }
}

/// Storage name for a fresh upload. The millisecond stamp keeps concurrent
/// submissions of the same file from clobbering each other, and doubles as
/// the job id downstream.
pub fn stamped_name(filename: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);

    format!("{millis}_{filename}")
}
