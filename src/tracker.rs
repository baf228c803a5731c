//! Drives an async task to a terminal state by bounded polling.
//!
//! One status query per attempt, in order. `completed` returns the result,
//! `failed` fails at once, everything else (queued, running, unknown status
//! strings, a missing status, a `success: false` envelope) counts as still
//! in progress. Transport errors are not retried and end the wait.

use anyhow::{Result, bail};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::api::{GenerationResult, TaskHandle, TaskStatus};
use crate::config::PollOptions;
use crate::error::{Cancelled, TaskFailed, TaskTimeout};
use crate::http::ImageApi;

/// One non-terminal observation, reported between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: TaskStatus,
}

/// Receives progress observations while a task is being awaited.
pub trait ProgressSink: Send + Sync {
    fn on_poll(&self, progress: &PollProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&PollProgress) + Send + Sync,
{
    fn on_poll(&self, progress: &PollProgress) {
        self(progress)
    }
}

/// Logs each observation at info level.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_poll(&self, progress: &PollProgress) {
        info!(
            "Attempt {}/{} - task status: {}",
            progress.attempt, progress.max_attempts, progress.status
        );
    }
}

/// Discards observations.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_poll(&self, _progress: &PollProgress) {}
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation signal shared between a waiter and whoever may
/// want to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelState>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelFlag::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Polls the service until a task finishes.
pub struct TaskTracker<'a, A: ImageApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: ImageApi + ?Sized> TaskTracker<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Waits using the attempt budget and interval of `options`.
    pub async fn await_with(
        &self,
        task: &TaskHandle,
        options: &PollOptions,
        progress: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GenerationResult> {
        self.await_completion(task, options.max_attempts, options.interval, progress, cancel)
            .await
    }

    /// Queries `task` at most `max_attempts` times, `interval` apart.
    ///
    /// Returns the result of the first `completed` observation. Fails with
    /// [`TaskFailed`] on `failed`, [`TaskTimeout`] when the budget runs out,
    /// [`Cancelled`] when `cancel` fires, and passes transport errors through.
    #[tracing::instrument(skip(self, progress, cancel))]
    pub async fn await_completion(
        &self,
        task: &TaskHandle,
        max_attempts: u32,
        interval: Duration,
        progress: &dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> Result<GenerationResult> {
        if max_attempts == 0 {
            bail!("max_attempts must be greater than zero");
        }

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(Cancelled {
                    task: task.clone(),
                    attempts: attempt - 1,
                }
                .into());
            }

            let envelope = self.api.query_status(task).await?;

            let status = if envelope.is_success() {
                match envelope.status_str() {
                    Some(raw) => TaskStatus::from(raw.to_string()),
                    None => {
                        debug!("Status response for {} carries no status", task);
                        TaskStatus::default()
                    }
                }
            } else {
                warn!(
                    "Status query for {} reported failure on attempt {}/{}: {:?}",
                    task,
                    attempt,
                    max_attempts,
                    envelope.error_detail()
                );
                TaskStatus::default()
            };

            match status {
                TaskStatus::Completed => {
                    info!("Task {} completed after {} status queries", task, attempt);
                    return envelope.payload::<GenerationResult>();
                }
                TaskStatus::Failed => {
                    warn!("Task {} failed", task);
                    return Err(TaskFailed { task: task.clone() }.into());
                }
                status => {
                    progress.on_poll(&PollProgress {
                        attempt,
                        max_attempts,
                        status,
                    });
                }
            }

            if attempt < max_attempts && !interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        debug!("Wait for {} cancelled while sleeping", task);
                    }
                }
            }
        }

        Err(TaskTimeout {
            task: task.clone(),
            attempts: max_attempts,
        }
        .into())
    }
}
