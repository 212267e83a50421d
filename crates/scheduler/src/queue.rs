use lightrail_core::{Result, SchedulerError, TaskId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Bounded FIFO of task ids waiting for a scheduling decision.
///
/// Submitters never wait: a full queue is reported immediately. The single
/// consumer (the scheduler loop) borrows the receiver while it runs and
/// hands it back on stop, so queued ids survive a restart.
pub struct TaskQueue {
    tx: mpsc::Sender<TaskId>,
    rx: Mutex<Option<mpsc::Receiver<TaskId>>>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity,
        }
    }

    pub fn push(&self, id: TaskId) -> Result<()> {
        match self.tx.try_send(id) {
            Ok(()) => Ok(()),
            // Closed only if the consumer went away; nothing will drain it
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                Err(SchedulerError::QueueFull {
                    capacity: self.capacity,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<TaskId>> {
        self.rx.lock().take()
    }

    pub(crate) fn restore_receiver(&self, rx: mpsc::Receiver<TaskId>) {
        *self.rx.lock() = Some(rx);
    }
}
