//! Shared plumbing for the hosted JSON APIs (models, embeddings, vector store).

use anyhow::{anyhow, Result};
use reqwest::Client;
use std::time::Duration;

pub(crate) fn build_client() -> Result<Client> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(300))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()?;
    Ok(client)
}

/// Map a transport failure to an error that names the endpoint.
pub(crate) fn request_error(endpoint: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("Request to {} timed out, check network connectivity", endpoint)
    } else if e.is_connect() {
        anyhow!("Failed to connect to {}: {}", endpoint, e)
    } else {
        anyhow!("Request to {} failed: {}", endpoint, e)
    }
}

/// Read a response body as JSON. Non-success statuses and HTML error pages
/// (proxies sometimes return 200 with HTML) become errors with a preview.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
            endpoint,
            status,
            preview
        ));
    }

    if !status.is_success() {
        let preview: String = body.chars().take(300).collect();
        return Err(anyhow!("{} returned HTTP {}: {}", endpoint, status, preview));
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}
