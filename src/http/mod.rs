//! HTTP transport for the generation service.

mod client;

#[cfg(test)]
pub use client::MockImageApi;
pub use client::{ApiClient, ImageApi};
