//! Submit-then-wait and single-call generation workflows.

use anyhow::{Context, Result};
use log::info;

use crate::api::{
    GenerationRequest, GenerationResult, HealthStatus, TaskAccepted, TaskHandle, TaskState,
};
use crate::config::PollOptions;
use crate::http::ImageApi;
use crate::tracker::{CancelFlag, ProgressSink, TaskTracker};

/// Checks that the service is up and returns its self-description.
pub async fn check_health<A: ImageApi + ?Sized>(api: &A) -> Result<HealthStatus> {
    api.health().await?.payload()
}

/// Creates an async task and returns the handle the service assigned.
#[tracing::instrument(skip(api, request))]
pub async fn submit<A: ImageApi + ?Sized>(
    api: &A,
    request: &GenerationRequest,
) -> Result<TaskAccepted> {
    request.validate()?;
    let accepted: TaskAccepted = api.submit_async(request).await?.payload()?;
    info!(
        "Task {} accepted with status {}",
        accepted.task_id, accepted.status
    );
    Ok(accepted)
}

/// Looks up the current state of a task once.
pub async fn task_state<A: ImageApi + ?Sized>(api: &A, task: &TaskHandle) -> Result<TaskState> {
    api.query_status(task)
        .await?
        .payload()
        .with_context(|| format!("Failed to read status of task {}", task))
}

/// Submits `request` and polls until the task finishes.
#[tracing::instrument(skip(api, request, options, progress, cancel))]
pub async fn generate_and_wait<A: ImageApi + ?Sized>(
    api: &A,
    request: &GenerationRequest,
    options: &PollOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> Result<GenerationResult> {
    let accepted = submit(api, request).await?;
    TaskTracker::new(api)
        .await_with(&accepted.task_id, options, progress, cancel)
        .await
}

/// Generates in one blocking exchange; the service does the waiting.
#[tracing::instrument(skip(api, request))]
pub async fn generate_sync<A: ImageApi + ?Sized>(
    api: &A,
    request: &GenerationRequest,
) -> Result<GenerationResult> {
    request.validate()?;
    let result: GenerationResult = api.submit_sync(request).await?.payload()?;
    info!("Synchronous generation returned {} image(s)", result.images.len());
    Ok(result)
}
