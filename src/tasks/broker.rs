use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::model::TaskId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("submission queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("submission queue is closed")]
    Closed,
}

/// Bounded FIFO of task ids feeding the dispatcher
///
/// Producers never wait: a saturated buffer is reported to the caller as
/// [`QueueError::Full`] instead of blocking the submitting thread.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    tx: mpsc::Sender<TaskId>,
    capacity: usize,
}

impl SubmissionQueue {
    /// Create the queue and the receiving half for the dispatcher
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskId>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        debug!(capacity, "Created submission queue");
        (Self { tx, capacity }, rx)
    }

    pub fn push(&self, id: TaskId) -> Result<(), QueueError> {
        match self.tx.try_send(id) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(task_id = %id, capacity = self.capacity, "Submission queue saturated");
                Err(QueueError::Full {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = SubmissionQueue::new(4);
        for id in 1..=3 {
            queue.push(TaskId(id)).unwrap();
        }

        assert_eq!(rx.recv().await, Some(TaskId(1)));
        assert_eq!(rx.recv().await, Some(TaskId(2)));
        assert_eq!(rx.recv().await, Some(TaskId(3)));
    }

    #[tokio::test]
    async fn test_full_queue_reports_capacity() {
        let (queue, _rx) = SubmissionQueue::new(2);
        queue.push(TaskId(1)).unwrap();
        queue.push(TaskId(2)).unwrap();

        assert_eq!(
            queue.push(TaskId(3)),
            Err(QueueError::Full { capacity: 2 })
        );
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, rx) = SubmissionQueue::new(2);
        drop(rx);

        assert!(queue.is_closed());
        assert_eq!(queue.push(TaskId(1)), Err(QueueError::Closed));
    }
}
