//! Notification workers.
//!
//! Workers pull expired entries off the scheduler's work queue and run the
//! notifier for each. They never see the index. A slow notification ties up
//! only the worker running it.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::entry::Entry;
use crate::notify::Notifier;
use crate::scheduler::Shared;

/// Consumer handle on the work queue.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Next expired entry, waiting if the queue is empty.
    ///
    /// Returns None once the queue has been closed and fully drained.
    pub async fn get_work(&self) -> Option<Entry> {
        loop {
            // Register for a wakeup before looking, so a push or close that
            // lands between the check and the await is not missed.
            let notified = self.shared.work_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if let Some(entry) = state.queue.pop_front() {
                    return Some(entry);
                }
                if state.queue_closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop handing out work once the queue is empty, and wake every waiter.
    pub(crate) async fn close(&self) {
        self.shared.state.lock().await.queue_closed = true;
        self.shared.work_ready.notify_waiters();
    }
}

/// Fixed set of worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(count: usize, queue: WorkQueue, notifier: Arc<dyn Notifier>) -> Self {
        let handles = (0..count)
            .map(|id| {
                let queue = queue.clone();
                let notifier = notifier.clone();
                tokio::spawn(run_worker(id, queue, notifier))
            })
            .collect();
        Self { handles }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. The queue must already be closed.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
    }
}

async fn run_worker(id: usize, queue: WorkQueue, notifier: Arc<dyn Notifier>) {
    tracing::debug!(worker = id, "worker started");
    while let Some(entry) = queue.get_work().await {
        tracing::debug!(worker = id, key = entry.key(), "running notification");
        notifier.notify(entry.key(), entry.last_address()).await;
    }
    tracing::debug!(worker = id, "worker exiting");
}
