#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod provider;
pub mod tool;
pub mod transcript;

pub use agent::{AgentEvent, AgentSession, EventSink, StreamCallbacks};
pub use error::{Error, Result};
