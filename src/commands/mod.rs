use anyhow::Result;
use log::debug;
use std::io::{IsTerminal, Write};

use crate::{
    api::{GenerationRequest, GenerationResult, TaskHandle},
    config::PollOptions,
    http::ImageApi,
    tracker::{CancelFlag, LogProgress, PollProgress, ProgressSink, TaskTracker},
    workflow,
};

mod interactive;

pub use interactive::interactive;

/// Print the service health
#[tracing::instrument(skip(api))]
pub async fn health<A: ImageApi>(api: &A) -> Result<()> {
    let health = workflow::check_health(api).await?;
    match (&health.service, &health.version) {
        (Some(service), Some(version)) => {
            println!("Service status: {} ({} {})", health.status, service, version)
        }
        _ => println!("Service status: {}", health.status),
    }
    Ok(())
}

/// Submit a task and, unless `wait` is false, poll it to completion
#[tracing::instrument(skip(api, request, options, cancel))]
pub async fn generate<A: ImageApi>(
    api: &A,
    request: &GenerationRequest,
    options: &PollOptions,
    wait: bool,
    cancel: &CancelFlag,
) -> Result<()> {
    let accepted = workflow::submit(api, request).await?;
    println!("Task created: {}", accepted.task_id);
    println!("Status: {}", accepted.status);
    if let Some(seconds) = accepted.estimated_time_seconds {
        println!("Estimated time: {}s", seconds);
    }

    if !wait {
        return Ok(());
    }

    debug!(
        "Waiting up to {:?} for task {}",
        options.worst_case(),
        accepted.task_id
    );

    let interactive_stdout = std::io::stdout().is_terminal();
    let progress_line = |p: &PollProgress| {
        print!("\rAttempt {}/{} - task status: {}", p.attempt, p.max_attempts, p.status);
        let _ = std::io::stdout().flush();
    };
    // Redirected output gets no carriage-return line.
    let progress: &dyn ProgressSink = if interactive_stdout {
        &progress_line
    } else {
        &LogProgress
    };

    let result = TaskTracker::new(api)
        .await_with(&accepted.task_id, options, progress, cancel)
        .await;
    if interactive_stdout {
        // End the progress line before printing anything else.
        println!();
    }

    print_result(&mut std::io::stdout(), &result?)?;
    Ok(())
}

/// Generate with a single blocking request
#[tracing::instrument(skip(api, request))]
pub async fn generate_sync<A: ImageApi>(api: &A, request: &GenerationRequest) -> Result<()> {
    let result = workflow::generate_sync(api, request).await?;
    print_result(&mut std::io::stdout(), &result)?;
    Ok(())
}

/// Print the current state of one task
#[tracing::instrument(skip(api))]
pub async fn status<A: ImageApi>(api: &A, task: &TaskHandle) -> Result<()> {
    let state = workflow::task_state(api, task).await?;
    println!("Task: {}", task);
    println!("Status: {}", state.status());
    if let Some(prompt) = &state.prompt {
        println!("Prompt: {}", prompt);
    }
    if let Some(images) = &state.images {
        print_images(&mut std::io::stdout(), images)?;
    }
    Ok(())
}

pub(crate) fn print_result<W: Write>(out: &mut W, result: &GenerationResult) -> Result<()> {
    if let Some(prompt) = &result.prompt {
        writeln!(out, "Prompt: {}", prompt)?;
    }
    if result.images.is_empty() {
        writeln!(out, "The service returned no images.")?;
        return Ok(());
    }
    print_images(out, &result.images)
}

fn print_images<W: Write>(out: &mut W, images: &[String]) -> Result<()> {
    writeln!(out, "Images ({}):", images.len())?;
    for (i, url) in images.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, url)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiEnvelope;
    use crate::error::TaskFailed;
    use crate::http::MockImageApi;
    use serde_json::json;
    use std::time::Duration;

    fn result_with(images: &[&str]) -> GenerationResult {
        serde_json::from_value(json!({"images": images, "prompt": "a cat"})).unwrap()
    }

    #[test]
    fn test_print_result_lists_images() {
        let mut out = Vec::new();
        print_result(&mut out, &result_with(&["https://x/1.png", "https://x/2.png"])).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Prompt: a cat\nImages (2):\n  1. https://x/1.png\n  2. https://x/2.png\n"
        );
    }

    #[test]
    fn test_print_result_without_images() {
        let mut out = Vec::new();
        print_result(&mut out, &result_with(&[])).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("no images"));
    }

    #[tokio::test]
    async fn test_generate_no_wait_skips_polling() {
        let mut api = MockImageApi::new();
        api.expect_submit_async().times(1).returning(|_| {
            Ok(ApiEnvelope::ok(json!({"task_id": "abc123", "status": "queued"})))
        });
        api.expect_query_status().never();

        let result = generate(
            &api,
            &GenerationRequest::new("a cat"),
            &PollOptions::default(),
            false,
            &CancelFlag::new(),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_generate_surfaces_task_failure() {
        let mut api = MockImageApi::new();
        api.expect_submit_async().times(1).returning(|_| {
            Ok(ApiEnvelope::ok(json!({"task_id": "abc123", "status": "queued"})))
        });
        api.expect_query_status()
            .times(1)
            .returning(|_| Ok(ApiEnvelope::ok(json!({"status": "failed"}))));

        let err = generate(
            &api,
            &GenerationRequest::new("a cat"),
            &PollOptions::new(5, Duration::ZERO),
            true,
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();

        assert!(err.downcast_ref::<TaskFailed>().is_some());
    }

    #[tokio::test]
    async fn test_status_prints_state() {
        let mut api = MockImageApi::new();
        api.expect_query_status().times(1).returning(|_| {
            Ok(ApiEnvelope::ok(
                json!({"status": "completed", "images": ["https://x/1.png"]}),
            ))
        });

        assert!(status(&api, &TaskHandle::new("abc123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_reports_transport_error() {
        let mut api = MockImageApi::new();
        api.expect_health().times(1).returning(|| {
            Err(crate::error::TransportError::new(
                crate::error::TransportErrorKind::Connect,
                "connection refused",
            )
            .into())
        });

        assert!(health(&api).await.is_err());
    }
}
