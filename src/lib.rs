//! Client for an HTTP image-generation service.
//!
//! [`http::ApiClient`] performs the service exchanges, [`tracker::TaskTracker`]
//! drives an async task to completion, and [`workflow`] combines the two.

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod tracker;
pub mod workflow;

pub use api::{ApiEnvelope, GenerationRequest, GenerationResult, TaskHandle, TaskStatus};
pub use config::{ClientConfig, PollOptions};
pub use http::{ApiClient, ImageApi};
pub use tracker::{CancelFlag, TaskTracker};
