use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No model provider configured. Add one or set OPENAI_API_KEY / ANTHROPIC_API_KEY")]
    NoProviderConfigured,

    #[error("Unsupported provider: {0}")]
    ProviderUnsupported(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::Error),

    #[error("Tool server error: {0}")]
    Mcp(#[from] crate::mcp::McpError),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("No progress from the agent for {0:?}")]
    StreamStalled(std::time::Duration),
}

impl Error {
    /// True when the user must configure a provider before anything can run.
    pub fn is_setup_required(&self) -> bool {
        matches!(self, Self::NoProviderConfigured)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_required_only_for_missing_provider() {
        assert!(Error::NoProviderConfigured.is_setup_required());
        assert!(!Error::ProviderUnsupported("custom".into()).is_setup_required());
        assert!(!Error::Engine("boom".into()).is_setup_required());
    }
}
