//! JSON-over-HTTP client used by the model endpoints.

use crate::provider::error::Error;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a request proves who it is.
#[derive(Clone)]
pub enum AuthConfig {
    /// `Authorization: Bearer {token}`.
    Bearer(String),
    /// A vendor header such as `x-api-key: {key}`.
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
    extra: HeaderMap,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            extra: HeaderMap::new(),
        }
    }

    /// Attach a static header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, Error> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Build(format!("invalid value for header {name}")))?;
        self.extra.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = self.extra.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match &self.auth {
            AuthConfig::Bearer(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    Error::Build("API key contains invalid header characters".into())
                })?;
                headers.insert(AUTHORIZATION, value);
            }
            AuthConfig::ApiKey { header, key } => {
                let name = HeaderName::try_from(header.as_str())
                    .map_err(|_| Error::Build(format!("invalid auth header name {header}")))?;
                let value = HeaderValue::from_str(key).map_err(|_| {
                    Error::Build("API key contains invalid header characters".into())
                })?;
                headers.insert(name, value);
            }
        }

        Ok(headers)
    }

    async fn send<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, Error> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_value);
            return Err(Error::RateLimited { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }
        Ok(response)
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, Error> {
        let headers = self.build_headers()?;
        let text = self.send(path, body, headers).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Api(format!("Failed to parse response: {e}\nBody: {text}")))
    }

    /// POST a JSON body and hand back the raw event-stream bytes.
    pub async fn post_stream<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, Error> {
        let mut headers = self.build_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(self.send(path, body, headers).await?.bytes_stream())
    }
}

/// Parse a `Retry-After` value given in seconds, rounding fractions up.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after_value(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(secs.max(1));
    }
    let f = s.parse::<f64>().ok()?;
    (f.is_finite() && f > 0.0).then(|| (f.ceil() as u64).max(1))
}
