//! Model providers: configuration, resolution, and the OpenAI and Anthropic
//! wire clients.

mod anthropic;
mod client;
mod config;
mod error;
mod http;
mod openai;
mod resolver;
mod stream;
mod types;

pub use client::{Client, LlmApi, create_model};
pub use config::{Protocol, ProviderConfig, ProviderDraft, ProviderKind};
pub use error::{Error, format_api_error};
pub use resolver::{
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_MODEL, Env, MapEnv, ProviderResolver, SystemEnv,
    select_default,
};
pub use types::*;

/// A resolved provider: a persisted or synthesized config with environment
/// backfill applied.
pub type ResolvedProviderConfig = ProviderConfig;
