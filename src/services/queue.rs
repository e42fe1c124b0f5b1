use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use uuid::Uuid;

/// Decision taken for one queued id while scanning for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Remove the id and hand it to the caller.
    Take,
    /// Leave it queued (e.g. its backend is down) and keep scanning.
    Skip,
    /// Remove the id without taking it (job gone or no longer queued).
    Discard,
}

/// FIFO of queued job ids with a wake-up signal for idle workers.
#[derive(Default)]
pub struct JobQueue {
    pending: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Uuid>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a job id and wake one idle worker.
    pub fn push(&self, job_id: Uuid) {
        self.lock().push_back(job_id);
        self.notify.notify_one();
    }

    /// Scan in FIFO order and take the first id `pick` accepts.
    ///
    /// The queue stays locked for the whole scan, so two callers can never
    /// take the same id.
    pub fn take_first(&self, mut pick: impl FnMut(Uuid) -> Pick) -> Option<Uuid> {
        let mut pending = self.lock();
        let mut index = 0;
        while index < pending.len() {
            let id = pending[index];
            match pick(id) {
                Pick::Take => {
                    pending.remove(index);
                    return Some(id);
                }
                Pick::Skip => index += 1,
                Pick::Discard => {
                    pending.remove(index);
                }
            }
        }
        None
    }

    /// Current queue depth (pending jobs, including ones waiting on a backend).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves on the next [`push`](Self::push), or immediately if one was missed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_take() {
        let queue = JobQueue::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.push(a);
        queue.push(b);
        assert_eq!(queue.take_first(|_| Pick::Take), Some(a));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_skipped_ids_stay_queued() {
        let queue = JobQueue::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.push(a);
        queue.push(b);
        let taken = queue.take_first(|id| if id == a { Pick::Skip } else { Pick::Take });
        assert_eq!(taken, Some(b));
        assert_eq!(queue.take_first(|_| Pick::Skip), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_discard_removes() {
        let queue = JobQueue::new();
        queue.push(Uuid::new_v4());
        assert_eq!(queue.take_first(|_| Pick::Discard), None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.push(Uuid::new_v4());
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
