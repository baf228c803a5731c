use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::status::{TaskHandle, TaskStatus};

/// Width and height used when the caller does not pick one.
pub const DEFAULT_DIMENSION: u32 = 512;

/// Negative prompt sent when none is given ("blurry, deformed, malformed").
pub const DEFAULT_NEGATIVE_PROMPT: &str = "模糊，变形，畸形";

/// Body of `POST /api/generate` and `POST /api/generate-sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    prompt: String,
    width: u32,
    height: u32,
    batch_size: u32,
    negative_prompt: String,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            batch_size: 1,
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn negative_prompt(&self) -> &str {
        &self.negative_prompt
    }

    /// Rejects requests the service can never accept.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            bail!("Prompt must not be empty.");
        }
        if self.width == 0 || self.height == 0 {
            bail!(
                "Image size must be positive, got {}x{}.",
                self.width,
                self.height
            );
        }
        if self.batch_size == 0 {
            bail!("Batch size must be at least 1.");
        }
        Ok(())
    }
}

/// Data of a successful async submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAccepted {
    pub task_id: TaskHandle,
    #[serde(default)]
    pub status: TaskStatus,
    pub prompt: Option<String>,
    pub estimated_time_seconds: Option<u64>,
}

/// Data of a successful status query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: Option<TaskHandle>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    pub images: Option<Vec<String>>,
    pub prompt: Option<String>,
    pub estimated_time_seconds: Option<u64>,
}

impl TaskState {
    /// Reported status; missing or `null` reads as an empty `Unknown`.
    pub fn status(&self) -> TaskStatus {
        self.status.clone().unwrap_or_default()
    }
}

/// Final output of a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Image references in the order the service returned them.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
    pub prompt: Option<String>,
    pub task_id: Option<TaskHandle>,
    /// Any other fields the service attached.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Data of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<String>,
}
