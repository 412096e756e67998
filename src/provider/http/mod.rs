//! HTTP plumbing shared by the model clients.

mod client;
mod sse;

pub use client::{AuthConfig, HttpClient};
pub use sse::SseParser;
