use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::JobError;
use crate::models::{Job, Status};

/// The single source of truth for job state. Status polling reads it from
/// any number of request handlers while the worker writes; the map never
/// leaves the mutex.
pub struct JobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new() -> JobStore {
        JobStore {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(&self, id: &str, filename: &str) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap();

        if jobs.contains_key(id) {
            return Err(JobError::DuplicateJob(id.to_owned()));
        }

        jobs.insert(
            id.to_owned(),
            Job {
                id: id.to_owned(),
                status: Status::Pending,
                filename: filename.to_owned(),
                created_at: Instant::now(),
                process_time: None,
                error: None,
            },
        );

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn update_status(
        &self,
        id: &str,
        status: Status,
        error: Option<String>,
        process_time: Option<Duration>,
    ) -> Result<(), JobError> {
        let mut jobs = self.jobs.lock().unwrap();

        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::UnknownJob(id.to_owned()))?;

        job.status = status;
        job.error = error;

        if process_time.is_some() {
            job.process_time = process_time;
        }

        Ok(())
    }

    /// Drops every job older than `ttl` and returns the removed records so
    /// the caller can unlink their files.
    pub fn remove_expired(&self, now: Instant, ttl: Duration) -> Vec<Job> {
        let mut jobs = self.jobs.lock().unwrap();

        let expired: Vec<String> = jobs
            .values()
            .filter(|job| now.saturating_duration_since(job.created_at) > ttl)
            .map(|job| job.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| jobs.remove(id))
            .collect()
    }
}
