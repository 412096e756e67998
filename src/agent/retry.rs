use crate::provider::Error;
use std::time::Duration;

pub(crate) const MAX_RETRIES: u32 = 3;
const MAX_RETRY_DELAY: u64 = 60;

/// Classify a provider error, returning the category if it is transient.
pub(crate) fn retryable_category(err: &Error) -> Option<&'static str> {
    match err {
        Error::RateLimited { .. } => Some("Rate limited"),
        Error::Http(e) if e.is_timeout() => Some("Request timed out"),
        Error::Http(e) if e.is_connect() || e.is_request() => Some("Network error"),
        Error::Http(e) => e.status().and_then(|s| status_category(s.as_u16())),
        Error::Api(msg) => http_status(msg)
            .and_then(status_category)
            .or_else(|| message_category(msg)),
        Error::Stream(msg) => message_category(msg),
        Error::Build(_) | Error::Cancelled => None,
    }
}

/// Back-off before attempt `attempt` (1-based), honoring a server hint.
pub(crate) fn retry_delay(err: &Error, attempt: u32) -> Duration {
    let hinted = match err {
        Error::RateLimited { retry_after } => *retry_after,
        _ => None,
    };
    Duration::from_secs(hinted.unwrap_or(1u64 << attempt).min(MAX_RETRY_DELAY))
}

fn http_status(msg: &str) -> Option<u16> {
    msg.strip_prefix("HTTP ")?.get(..3)?.parse().ok()
}

fn status_category(status: u16) -> Option<&'static str> {
    match status {
        429 => Some("Rate limited"),
        408 => Some("Request timed out"),
        500..=599 => Some("Server error"),
        _ => None,
    }
}

fn message_category(msg: &str) -> Option<&'static str> {
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") {
        Some("Rate limited")
    } else if lower.contains("overloaded") {
        Some("Server overloaded")
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Some("Request timed out")
    } else if lower.contains("connection reset") || lower.contains("network") {
        Some("Network error")
    } else {
        None
    }
}
