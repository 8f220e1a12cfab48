//! Shared HTTP client and response helpers for cloud backends.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};

use crate::error::VoxError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Per-request deadlines come from [`with_timeout`](crate::util::timeout::with_timeout).
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .user_agent(concat!("voxbook/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Headers for a Bearer-token JSON API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Map a non-success status to an error.
pub fn status_to_error(status: u16, retry_after: Option<u64>, body: &str) -> VoxError {
    match status {
        401 | 403 => VoxError::Authentication(body.to_string()),
        429 => VoxError::RateLimited {
            retry_after_ms: retry_after.or_else(|| retry_after_from_body(body)),
        },
        _ => VoxError::api(status, body),
    }
}

fn retry_after_from_body(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Read an audio payload, rejecting errors, non-audio content and empty bodies.
pub async fn read_audio_response(response: reqwest::Response) -> Result<Vec<u8>, VoxError> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(status_to_error(status, retry_after, &body));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !is_audio_content_type(&content_type) {
        return Err(VoxError::Playback(format!(
            "Expected an audio payload, got '{content_type}'"
        )));
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(VoxError::Playback("Audio payload was empty".to_string()));
    }
    Ok(bytes.to_vec())
}

fn is_audio_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    mime.starts_with("audio/") || mime == "application/octet-stream"
}

pub fn trim_trailing_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}
