//! Expiry notification.
//!
//! Workers hand every expired entry to a `Notifier`. The daemon uses
//! `ScriptNotifier`, which runs an external program; tests substitute a
//! recording implementation.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;

use futures::future::BoxFuture;
use thiserror::Error;

/// Called once for each key whose timeout elapsed.
///
/// Failures are the notifier's to log. The scheduler does not retry and
/// does not care about the outcome.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, key: &'a str, address: &'a str) -> BoxFuture<'a, ()>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} exited with status {code}")]
    Exit { path: PathBuf, code: i32 },

    #[error("{path} killed by signal {signal}")]
    Signal { path: PathBuf, signal: i32 },
}

/// Runs `<script> <key> <last address>` for each expired entry.
#[derive(Debug, Clone)]
pub struct ScriptNotifier {
    script: PathBuf,
}

impl ScriptNotifier {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// Run the script to completion.
    pub async fn run(&self, key: &str, address: &str) -> Result<(), NotifyError> {
        let status = tokio::process::Command::new(&self.script)
            .arg(key)
            .arg(address)
            .status()
            .await
            .map_err(|source| NotifyError::Spawn {
                path: self.script.clone(),
                source,
            })?;

        if status.success() {
            return Ok(());
        }
        if let Some(signal) = status.signal() {
            return Err(NotifyError::Signal {
                path: self.script.clone(),
                signal,
            });
        }
        Err(NotifyError::Exit {
            path: self.script.clone(),
            code: status.code().unwrap_or(-1),
        })
    }
}

impl Notifier for ScriptNotifier {
    fn notify<'a>(&'a self, key: &'a str, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self.run(key, address).await {
                Ok(()) => tracing::debug!(key, address, "notify script finished"),
                Err(e) => tracing::error!(key, address, error = %e, "notify script failed"),
            }
        })
    }
}
