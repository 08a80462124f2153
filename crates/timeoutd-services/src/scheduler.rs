//! Timeout scheduler.
//!
//! `receive()` registers, renews or cancels keys. A single scheduling task
//! waits for the earliest deadline and moves expired entries onto the work
//! queue, where the worker pool picks them up.
//!
//! The index, the work queue and the run flags sit behind one mutex. An
//! entry is removed from the index in the same critical section that pushes
//! it onto the queue, so it is never in both.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use timeoutd_core::config::SchedulerConfig;

use crate::entry::Entry;
use crate::index::EntryIndex;
use crate::notify::Notifier;
use crate::worker::{WorkQueue, WorkerPool};

/// What `receive()` did with a keepalive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New key registered.
    Created,
    /// Known key moved to a later deadline.
    Refreshed,
    /// Timeout <= 0 removed a tracked key.
    Cancelled,
    /// Timeout <= 0 for a key that was not tracked.
    NotFound,
    /// New key dropped because the entry limit was reached.
    Rejected,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) index: EntryIndex,
    pub(crate) queue: VecDeque<Entry>,
    pub(crate) stopping: bool,
    pub(crate) queue_closed: bool,
}

/// State shared between the scheduler, its loop and the workers.
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    /// Index changed; the earliest deadline may have moved.
    pub(crate) schedule_wake: Notify,
    pub(crate) stop: Notify,
    pub(crate) work_ready: Notify,
}

struct Running {
    schedule_loop: JoinHandle<()>,
    workers: WorkerPool,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    entry_limit: usize,
    worker_count: usize,
    notifier: Arc<dyn Notifier>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, notifier: Arc<dyn Notifier>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            schedule_wake: Notify::new(),
            stop: Notify::new(),
            work_ready: Notify::new(),
        });
        Self {
            shared,
            entry_limit: config.entry_limit,
            worker_count: config.workers,
            notifier,
            running: Mutex::new(None),
        }
    }

    /// Handle one decoded keepalive.
    pub async fn receive(&self, key: &str, timeout_secs: i32, address: &str) -> ReceiveOutcome {
        let outcome = {
            let mut state = self.shared.state.lock().await;

            if timeout_secs <= 0 {
                match state.index.remove(key) {
                    Some(_) => {
                        tracing::info!(key, address, "voluntary removal");
                        ReceiveOutcome::Cancelled
                    }
                    None => {
                        tracing::debug!(key, address, "removal of unknown key");
                        ReceiveOutcome::NotFound
                    }
                }
            } else {
                let expires_at = Instant::now() + Duration::from_secs(timeout_secs as u64);
                if state.index.reschedule(key, expires_at, address) {
                    tracing::trace!(key, address, timeout_secs, "refreshed");
                    ReceiveOutcome::Refreshed
                } else if state.index.len() >= self.entry_limit {
                    tracing::warn!(
                        key,
                        address,
                        limit = self.entry_limit,
                        "entry limit reached, new key dropped"
                    );
                    ReceiveOutcome::Rejected
                } else {
                    state.index.insert(Entry::new(key, expires_at, address));
                    tracing::debug!(key, address, timeout_secs, "new entry");
                    ReceiveOutcome::Created
                }
            }
        };

        self.shared.schedule_wake.notify_one();
        outcome
    }

    /// Launch the scheduling task and the worker pool.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("scheduler already running");
            return;
        }

        {
            let mut state = self.shared.state.lock().await;
            state.stopping = false;
            state.queue_closed = false;
        }

        let schedule_loop = tokio::spawn(schedule_loop(self.shared.clone()));
        let workers = WorkerPool::spawn(
            self.worker_count,
            WorkQueue::new(self.shared.clone()),
            self.notifier.clone(),
        );
        tracing::info!(
            workers = workers.len(),
            entry_limit = self.entry_limit,
            "scheduler started"
        );

        *running = Some(Running {
            schedule_loop,
            workers,
        });
    }

    /// Stop the scheduling task, then the workers.
    ///
    /// Entries already on the work queue are still notified before the
    /// workers exit.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        self.shared.state.lock().await.stopping = true;
        self.shared.stop.notify_one();
        if let Err(e) = running.schedule_loop.await {
            tracing::error!(error = %e, "scheduling task failed");
        }

        self.work_queue().close().await;
        running.workers.join().await;
        tracing::info!("scheduler stopped");
    }

    /// Pull the next expired entry. None once stopped and drained.
    pub async fn get_work(&self) -> Option<Entry> {
        self.work_queue().get_work().await
    }

    pub fn work_queue(&self) -> WorkQueue {
        WorkQueue::new(self.shared.clone())
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.state.lock().await.index.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().await.index.contains(key)
    }

    /// Snapshot of a tracked entry.
    pub async fn entry(&self, key: &str) -> Option<Entry> {
        self.shared.state.lock().await.index.get(key).cloned()
    }
}

async fn schedule_loop(shared: Arc<Shared>) {
    tracing::debug!("scheduling loop started");

    loop {
        let wake = shared.schedule_wake.notified();
        let stop = shared.stop.notified();
        tokio::pin!(wake, stop);
        wake.as_mut().enable();
        stop.as_mut().enable();

        let next_deadline = {
            let mut state = shared.state.lock().await;
            if state.stopping {
                break;
            }

            let now = Instant::now();
            while let Some(entry) = state.index.pop_expired(now) {
                tracing::info!(
                    key = entry.key(),
                    address = entry.last_address(),
                    "timeout"
                );
                state.queue.push_back(entry);
                shared.work_ready.notify_one();
            }

            state.index.earliest().map(Entry::expires_at)
        };

        match next_deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                tracing::trace!(wait_ms = wait.as_millis() as u64, "sleeping until next deadline");
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = &mut wake => {}
                    _ = &mut stop => {}
                }
            }
            None => {
                tokio::select! {
                    _ = &mut wake => {}
                    _ = &mut stop => {}
                }
            }
        }
    }

    tracing::debug!("scheduling loop exiting");
}
