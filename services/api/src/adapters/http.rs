//! services/api/src/adapters/http.rs
//!
//! A small JSON-over-HTTP client shared by every third-party provider adapter.
//! It owns the base URL and credentials and classifies failures into `PortError`.

use mentorship_core::ports::{PortError, PortResult};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    provider: &'static str,
    base_url: String,
    api_key: Option<String>,
}

impl ProviderClient {
    pub fn new(provider: &'static str, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Sends `key` in the `x-api-key` header of every request.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// POSTs `body` to `path` and decodes the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B, bearer: Option<&str>) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(path, body, bearer).await?;
        response.json::<T>().await.map_err(|e| {
            PortError::Unexpected(format!("{} returned an unreadable reply: {}", self.provider, e))
        })
    }

    /// POSTs `body` to `path`, ignoring any reply body.
    pub async fn post(&self, path: &str, body: &(impl Serialize + ?Sized)) -> PortResult<()> {
        self.send(path, body, None).await.map(|_| ())
    }

    async fn send<B>(&self, path: &str, body: &B, bearer: Option<&str>) -> PortResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(provider = self.provider, %url, error = %e, "provider request failed");
            PortError::Transient(format!("{} is unreachable: {}", self.provider, e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(provider = self.provider, %url, %status, %detail, "provider rejected request");
        Err(classify_status(self.provider, status, detail))
    }
}

pub(crate) fn classify_status(provider: &str, status: StatusCode, detail: String) -> PortError {
    let message = format!("{} returned {}: {}", provider, status, detail);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::PermissionDenied(message),
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => {
            PortError::Validation(message)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => PortError::Transient(message),
        s if s.is_server_error() => PortError::Transient(message),
        _ => PortError::Unexpected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_statuses_are_classified() {
        let classify = |status| classify_status("email", status, String::new());
        assert!(matches!(classify(StatusCode::UNAUTHORIZED), PortError::PermissionDenied(_)));
        assert!(matches!(classify(StatusCode::UNPROCESSABLE_ENTITY), PortError::Validation(_)));
        assert!(classify(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(classify(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(matches!(classify(StatusCode::IM_A_TEAPOT), PortError::Unexpected(_)));
    }

    #[test]
    fn base_urls_are_joined_without_double_slashes() {
        let client = ProviderClient::new("billing", "https://billing.example.com/");
        assert_eq!(client.base_url, "https://billing.example.com");
    }
}
