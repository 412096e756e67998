//! OpenAI chat-completions client.
//!
//! Also serves `custom` providers that speak the OpenAI dialect behind their
//! own base URL.

mod client;
mod convert;
mod request;
mod response;
mod stream;

pub use client::OpenAIClient;
