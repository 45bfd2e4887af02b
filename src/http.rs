//! Shared HTTP plumbing for the OpenAI-compatible gateway, Ollama and the
//! web search API.
//!
//! Each call is a single attempt. Failures are classified so callers can
//! decide whether a retry makes sense:
//! - HTTP 429 → [`ProviderError::RateLimited`]
//! - HTTP 5xx and network errors → [`ProviderError::Transient`]
//! - any other non-success status → [`ProviderError::Fatal`]

use std::time::Duration;

use facilities_core::error::ProviderError;
use reqwest::{RequestBuilder, StatusCode};

/// Header carrying the gateway API key when routing through a virtual key.
pub const GATEWAY_API_KEY_HEADER: &str = "x-portkey-api-key";
/// Header selecting the upstream provider behind the gateway.
pub const GATEWAY_VIRTUAL_KEY_HEADER: &str = "x-portkey-virtual-key";

pub fn client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::Fatal(format!("failed to build HTTP client: {}", e)))
}

/// Attach credentials: gateway headers when a virtual key is configured,
/// bearer auth otherwise. Without a key the request goes out unauthenticated.
pub fn with_auth(
    req: RequestBuilder,
    api_key: Option<&str>,
    virtual_key: Option<&str>,
) -> RequestBuilder {
    match (api_key, virtual_key) {
        (Some(key), Some(vk)) => req
            .header(GATEWAY_API_KEY_HEADER, key)
            .header(GATEWAY_VIRTUAL_KEY_HEADER, vk),
        (Some(key), None) => req.bearer_auth(key),
        (None, Some(vk)) => req.header(GATEWAY_VIRTUAL_KEY_HEADER, vk),
        (None, None) => req,
    }
}

/// Map a non-success status to a [`ProviderError`].
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> ProviderError {
    let msg = format!("{} API error {}: {}", service, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(msg)
    } else if status.is_server_error() {
        ProviderError::Transient(msg)
    } else {
        ProviderError::Fatal(msg)
    }
}

/// Send a request and decode a JSON body.
pub async fn send_json(service: &str, req: RequestBuilder) -> Result<serde_json::Value, ProviderError> {
    let response = req
        .send()
        .await
        .map_err(|e| ProviderError::Transient(format!("{} connection error: {}", service, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(format!("{} returned invalid JSON: {}", service, e)))
}

/// Read an API key from the named environment variable, treating an empty
/// value as unset.
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
