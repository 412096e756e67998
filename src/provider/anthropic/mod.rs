//! Anthropic Messages API client.

mod client;
mod convert;
mod request;
mod response;
mod stream;

pub use client::AnthropicClient;
