//! Shared HTTP client, headers and status mapping.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};

use crate::error::StrandError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Per-request deadlines come from the gateway's model timeout, so the
/// client itself only carries a generous upper bound.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Build headers for the Gemini API (`x-goog-api-key`).
pub fn google_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-goog-api-key", val);
    }
    headers
}

/// Turn a non-success response into an error, honouring `Retry-After`.
pub async fn error_from_response(resp: reqwest::Response) -> StrandError {
    let status = resp.status().as_u16();
    let header_retry = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64);
    let body = resp.text().await.unwrap_or_default();
    match status_to_error(status, &body) {
        StrandError::RateLimited { retry_after_ms } => StrandError::RateLimited {
            retry_after_ms: header_retry.or(retry_after_ms),
        },
        other => other,
    }
}

/// Map an HTTP status code and body to an error.
pub fn status_to_error(status: u16, body: &str) -> StrandError {
    match status {
        401 | 403 => StrandError::Authentication(body.to_string()),
        429 => StrandError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => StrandError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
