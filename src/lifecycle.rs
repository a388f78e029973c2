use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::info;

use crate::config::CONFIG;
use crate::error::JobError;
use crate::models::{build_path, DenoiseParams, FileKind, Status, WorkItem};
use crate::queue::QueueSender;
use crate::store::JobStore;

/// What a status poll gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: Status,
    pub error: Option<String>,
    pub process_time: Option<Duration>,
}

/// The operations the HTTP layer consumes: submit, poll, expire. Cheap to
/// clone into every handler and background task.
#[derive(Clone)]
pub struct JobService {
    jobs: Arc<JobStore>,
    queue: QueueSender,
}

impl JobService {
    pub fn new(jobs: Arc<JobStore>, queue: QueueSender) -> JobService {
        JobService { jobs, queue }
    }

    /// Registers a job and hands it to the worker. The input's file name
    /// becomes the job id; callers give every upload a uniquely stamped
    /// name, so a collision here means the same artifact was submitted
    /// twice in the same millisecond and that submission fails alone.
    ///
    /// Once this returns `Ok`, a status poll for the id observes at least
    /// `pending`; the record is created before the item is enqueued.
    pub fn submit(
        &self,
        input: &Path,
        output: &Path,
        params: DenoiseParams,
    ) -> Result<String, JobError> {
        let filename = input
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| JobError::BadLocation(input.to_owned()))?;

        let id = filename.to_owned();
        self.jobs.create(&id, filename)?;

        let item = WorkItem {
            job_id: id.clone(),
            input_path: input.to_owned(),
            output_path: output.to_owned(),
            params,
        };

        if let Err(err) = self.queue.enqueue(item) {
            // Nothing will ever pick this job up, so record that rather
            // than leave it pending until the sweep.
            let _ = self
                .jobs
                .update_status(&id, Status::Failed, Some(err.to_string()), None);

            return Err(err);
        }

        info!("[{}] submitted ({:?})", id, params.method);

        Ok(id)
    }

    pub fn get_status(&self, id: &str) -> Option<StatusReport> {
        self.jobs.get(id).map(|job| StatusReport {
            status: job.status,
            error: job.error,
            process_time: job.process_time,
        })
    }

    /// Drops every job past the retention window along with its files.
    pub fn cleanup_expired(&self) -> usize {
        self.sweep(Instant::now(), CONFIG.job_retention)
    }

    fn sweep(&self, now: Instant, ttl: Duration) -> usize {
        let removed = self.jobs.remove_expired(now, ttl);

        for job in &removed {
            // The files may already be gone; that's fine.
            let _ = fs::remove_file(build_path(&job.filename, FileKind::Original));
            let _ = fs::remove_file(build_path(&job.filename, FileKind::Processed));
        }

        removed.len()
    }
}

/// Periodic expiry sweep. Runs forever; anything going wrong inside a pass
/// is logged and the next pass still happens.
pub fn cleanup_loop(service: JobService) {
    info!(
        "starting cleanup sweep every {} seconds...",
        CONFIG.sweep_interval.as_secs()
    );

    loop {
        thread::sleep(CONFIG.sweep_interval);

        let removed = service.cleanup_expired();

        if removed > 0 {
            info!("cleanup: removed {} expired job(s)", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Method;
    use crate::queue;

    fn params() -> DenoiseParams {
        DenoiseParams::new(5, Method::Gaussian, false)
    }

    fn service(capacity: usize) -> (JobService, crate::queue::QueueReceiver) {
        let (tx, rx) = queue::bounded(capacity);
        (JobService::new(Arc::new(JobStore::new()), tx), rx)
    }

    fn submit(service: &JobService, name: &str) -> Result<String, JobError> {
        service.submit(
            &build_path(name, FileKind::Original),
            &build_path(name, FileKind::Processed),
            params(),
        )
    }

    #[test]
    fn submitted_jobs_answer_status_queries_immediately() {
        let (service, _rx) = service(8);

        let id = submit(&service, "1_cat.png").unwrap();
        let report = service.get_status(&id).unwrap();
        assert_eq!(report.status, Status::Pending);
        assert!(report.error.is_none());
    }

    #[test]
    fn submit_hands_the_worker_matching_locations() {
        let (service, rx) = service(8);

        let id = submit(&service, "1_cat.png").unwrap();

        let item = rx.dequeue().unwrap();
        assert_eq!(item.job_id, id);
        assert_eq!(item.input_path, build_path("1_cat.png", FileKind::Original));
        assert_eq!(
            item.output_path,
            build_path("1_cat.png", FileKind::Processed)
        );
    }

    #[test]
    fn duplicate_submission_fails_alone() {
        let (service, _rx) = service(8);

        submit(&service, "1_cat.png").unwrap();
        assert_eq!(
            submit(&service, "1_cat.png"),
            Err(JobError::DuplicateJob("1_cat.png".to_owned()))
        );
    }

    #[test]
    fn full_queue_surfaces_instead_of_blocking() {
        let (service, _rx) = service(1);

        submit(&service, "1_a.png").unwrap();
        assert_eq!(submit(&service, "2_b.png"), Err(JobError::QueueFull));

        // The stranded job is marked failed rather than left pending.
        let report = service.get_status("2_b.png").unwrap();
        assert_eq!(report.status, Status::Failed);
        assert!(report.error.is_some());
    }

    #[test]
    fn submit_rejects_inputs_without_a_file_name() {
        let (service, _rx) = service(8);

        let err = service
            .submit(Path::new("/"), Path::new("processed/x"), params())
            .unwrap_err();
        assert!(matches!(err, JobError::BadLocation(_)));
    }

    #[test]
    fn sweep_forgets_expired_jobs() {
        let (service, _rx) = service(8);
        let ttl = CONFIG.job_retention;

        let id = submit(&service, "1_old.png").unwrap();
        assert_eq!(service.sweep(Instant::now(), ttl), 0);
        assert!(service.get_status(&id).is_some());

        let later = Instant::now() + ttl + Duration::from_secs(1);
        assert_eq!(service.sweep(later, ttl), 1);
        assert!(service.get_status(&id).is_none());
    }
}
