//! timeoutd-services — the timeout scheduler and its notification workers.

pub mod entry;
pub mod index;
pub mod notify;
pub mod scheduler;
pub mod worker;

pub use entry::Entry;
pub use notify::{Notifier, NotifyError, ScriptNotifier};
pub use scheduler::{ReceiveOutcome, Scheduler};
pub use worker::{WorkQueue, WorkerPool};
