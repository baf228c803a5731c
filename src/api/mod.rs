//! Wire data shapes exchanged with the generation service.

mod envelope;
mod status;
mod types;

pub use envelope::ApiEnvelope;
pub use status::{TaskHandle, TaskStatus};
pub use types::{
    DEFAULT_DIMENSION, DEFAULT_NEGATIVE_PROMPT, GenerationRequest, GenerationResult, HealthStatus,
    TaskAccepted, TaskState,
};
