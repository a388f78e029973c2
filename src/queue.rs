use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use crate::error::JobError;
use crate::models::WorkItem;

/// Builds the hand-off channel between request handlers and the worker.
/// Strict FIFO; many senders, exactly one receiver.
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = sync_channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Clone)]
pub struct QueueSender {
    tx: SyncSender<WorkItem>,
}

impl QueueSender {
    /// Never blocks the caller; a full queue is the caller's problem to
    /// report, not to wait out.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), JobError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(JobError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(JobError::WorkerGone),
        }
    }
}

pub struct QueueReceiver {
    rx: Receiver<WorkItem>,
}

impl QueueReceiver {
    /// Blocks until work arrives. `None` once every sender is gone and the
    /// queue has drained, which is the worker's signal to stop.
    pub fn dequeue(&self) -> Option<WorkItem> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DenoiseParams, Method};

    fn item(job_id: &str) -> WorkItem {
        WorkItem {
            job_id: job_id.to_owned(),
            input_path: format!("uploads/{job_id}").into(),
            output_path: format!("processed/{job_id}").into(),
            params: DenoiseParams::new(5, Method::Gaussian, false),
        }
    }

    #[test]
    fn dequeue_preserves_submission_order() {
        let (tx, rx) = bounded(8);

        tx.enqueue(item("a")).unwrap();
        tx.enqueue(item("b")).unwrap();
        tx.enqueue(item("c")).unwrap();

        assert_eq!(rx.dequeue().unwrap().job_id, "a");
        assert_eq!(rx.dequeue().unwrap().job_id, "b");
        assert_eq!(rx.dequeue().unwrap().job_id, "c");
    }

    #[test]
    fn enqueue_reports_a_full_queue_instead_of_blocking() {
        let (tx, _rx) = bounded(1);

        tx.enqueue(item("a")).unwrap();
        assert_eq!(tx.enqueue(item("b")), Err(JobError::QueueFull));
    }

    #[test]
    fn enqueue_reports_a_missing_receiver() {
        let (tx, rx) = bounded(1);
        drop(rx);

        assert_eq!(tx.enqueue(item("a")), Err(JobError::WorkerGone));
    }

    #[test]
    fn dequeue_drains_after_senders_drop() {
        let (tx, rx) = bounded(8);

        tx.enqueue(item("a")).unwrap();
        tx.enqueue(item("b")).unwrap();
        drop(tx);

        assert_eq!(rx.dequeue().unwrap().job_id, "a");
        assert_eq!(rx.dequeue().unwrap().job_id, "b");
        assert!(rx.dequeue().is_none());
    }
}
