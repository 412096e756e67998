//! Errors raised while talking to a model endpoint.

use thiserror::Error;

/// Render an endpoint error for people, pulling the message out of a JSON body.
///
/// `"HTTP 401: {"error": {"message": "bad key"}}"` becomes `"HTTP 401: bad key"`;
/// anything without a recognizable JSON body is returned unchanged.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    let Some(json_start) = error.find('{') else {
        return error.to_string();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&error[json_start..]) else {
        return error.to_string();
    };
    let Some(msg) = extract_error_message(&json) else {
        return error.to_string();
    };
    let prefix = error[..json_start].trim();
    if prefix.is_empty() {
        msg
    } else {
        format!("{prefix} {msg}")
    }
}

fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    if let Some(error_obj) = json.get("error") {
        if let Some(msg) = error_obj.get("message").and_then(|v| v.as_str()) {
            return Some(match error_obj.get("type").and_then(|v| v.as_str()) {
                Some(kind) => format!("{msg} ({kind})"),
                None => msg.to_string(),
            });
        }
        if let Some(msg) = error_obj.as_str() {
            return Some(msg.to_string());
        }
    }
    json.get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid client configuration: {0}")]
    Build(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Cancelled")]
    Cancelled,
}
