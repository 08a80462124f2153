//! timeoutd integration tests.
//!
//! These drive the scheduler, codecs and workers together through their
//! public APIs. Timing tests run on tokio's paused clock; the UDP tests use
//! real loopback sockets.
//!
//!   cargo test --test integration

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;

use timeoutd_core::config::SchedulerConfig;
use timeoutd_services::{Notifier, Scheduler};

mod expiry;
mod loopback;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One notification as seen by the recording notifier.
#[derive(Debug, Clone)]
pub struct Fired {
    pub key: String,
    pub address: String,
    pub at: Instant,
}

/// Notifier that forwards every call to a channel.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Fired>,
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, key: &'a str, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.tx.send(Fired {
                key: key.to_string(),
                address: address.to_string(),
                at: Instant::now(),
            });
        })
    }
}

/// A scheduler wired to a recording notifier.
pub fn recording_scheduler(
    entry_limit: usize,
    workers: usize,
) -> (Arc<Scheduler>, mpsc::UnboundedReceiver<Fired>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = SchedulerConfig {
        entry_limit,
        workers,
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new(&config, Arc::new(RecordingNotifier { tx })));
    (scheduler, rx)
}

/// Everything currently buffered on the receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Fired>) -> Vec<Fired> {
    let mut out = Vec::new();
    while let Ok(fired) = rx.try_recv() {
        out.push(fired);
    }
    out
}
