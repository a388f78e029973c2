use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, info, warn};

use crate::denoise::Denoiser;
use crate::models::{Status, WorkItem};
use crate::queue::QueueReceiver;
use crate::store::JobStore;

/// Starts the single worker thread. It owns the receiving end of the queue;
/// dropping every sender lets it drain whatever is left and stop.
pub fn spawn<D>(
    queue: QueueReceiver,
    jobs: Arc<JobStore>,
    denoiser: D,
) -> std::io::Result<JoinHandle<()>>
where
    D: Denoiser + 'static,
{
    thread::Builder::new()
        .name("processor".to_owned())
        .spawn(move || processor(queue, jobs, denoiser))
}

pub fn processor<D: Denoiser>(queue: QueueReceiver, jobs: Arc<JobStore>, denoiser: D) {
    info!("starting denoise processor...");

    while let Some(item) = queue.dequeue() {
        process_item(&item, &jobs, &denoiser);
    }

    info!("denoise processor shutdown");
}

/// One job, start to finish. Nothing in here may escape: any failure is
/// folded into the job record so the loop can move on to the next item.
fn process_item<D: Denoiser>(item: &WorkItem, jobs: &JobStore, denoiser: &D) {
    if let Err(err) = jobs.update_status(&item.job_id, Status::Processing, None, None) {
        warn!("[{}] processor: {}, ignoring", item.job_id, err);
        return;
    }

    info!(
        "[{}] processor: denoising {}",
        item.job_id,
        item.input_path.display()
    );

    let started = Instant::now();
    let result = denoiser.denoise(&item.input_path, &item.output_path, &item.params);
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(()) => {
            info!(
                "[{}] processor: complete in {:.2}s",
                item.job_id,
                elapsed.as_secs_f64()
            );

            jobs.update_status(&item.job_id, Status::Completed, None, Some(elapsed))
        }
        Err(err) => {
            error!("[{}] processor: ended with error: {}", item.job_id, err);

            jobs.update_status(&item.job_id, Status::Failed, Some(err.to_string()), None)
        }
    };

    // The job can only have vanished through an expiry sweep mid-flight.
    if let Err(err) = outcome {
        warn!("[{}] processor: could not record outcome: {}", item.job_id, err);
    }
}
