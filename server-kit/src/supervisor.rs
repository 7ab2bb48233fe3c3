//! Supervised background serve loops
//!
//! Each server wrapper hands its long-running serve future to a
//! [`ServeTask`]. The task is fire-and-forget from the caller's point of view:
//! a serve error is logged and published on a status channel, never returned
//! from `start`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;

/// Status of a background serve loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Never started.
    Idle,
    /// Serving.
    Running,
    /// Finished after a shutdown request.
    Stopped,
    /// Finished on its own with an error.
    Failed(String),
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "idle"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Stopped => write!(f, "stopped"),
            TaskStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Reports `Failed` if the serve loop is dropped without publishing an
/// outcome, i.e. it panicked or was aborted.
struct StatusPublisher(watch::Sender<TaskStatus>);

impl Drop for StatusPublisher {
    fn drop(&mut self) {
        self.0.send_if_modified(|status| {
            if status.is_running() {
                *status = TaskStatus::Failed("serve loop panicked or was aborted".to_string());
                true
            } else {
                false
            }
        });
    }
}

/// Handle to a spawned serve loop.
#[derive(Debug)]
pub(crate) struct ServeTask {
    name: &'static str,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    status: watch::Receiver<TaskStatus>,
}

impl ServeTask {
    /// Spawn `serve` on the tokio runtime.
    ///
    /// `serve` must finish once `cancel` is cancelled.
    pub(crate) fn spawn<F, E>(name: &'static str, cancel: CancellationToken, serve: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, status) = watch::channel(TaskStatus::Running);

        let join = tokio::spawn(async move {
            let publisher = StatusPublisher(tx);
            let outcome = match serve.await {
                Ok(()) => {
                    tracing::debug!("{} serve loop finished", name);
                    TaskStatus::Stopped
                }
                Err(e) => {
                    tracing::error!("{} failed to serve: {}", name, e);
                    TaskStatus::Failed(e.to_string())
                }
            };
            publisher.0.send_replace(outcome);
        });

        Self {
            name,
            cancel,
            join,
            status,
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.clone()
    }

    /// Cancel the loop and wait for it to finish.
    ///
    /// With a timeout, the task is aborted once it expires.
    pub(crate) async fn shutdown(self, timeout: Option<Duration>) -> Result<TaskStatus, Elapsed> {
        self.cancel.cancel();

        let mut join = self.join;
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(joined) => joined,
                Err(elapsed) => {
                    tracing::warn!("{} did not stop within {:?}, aborting", self.name, limit);
                    join.abort();
                    return Err(elapsed);
                }
            },
            None => join.await,
        };

        if let Err(e) = joined {
            tracing::error!("{} serve task panicked: {}", self.name, e);
            return Ok(TaskStatus::Failed(format!("serve task panicked: {e}")));
        }

        let status = self.status.borrow().clone();
        Ok(status)
    }
}

/// Wait until a status channel reports that the loop is no longer running.
pub async fn wait_for_exit(mut status: watch::Receiver<TaskStatus>) -> TaskStatus {
    match status.wait_for(|s| !s.is_running()).await {
        Ok(current) => current.clone(),
        Err(_) => TaskStatus::Failed("serve task ended without reporting".to_string()),
    }
}
