//! HTTP plumbing shared by every backend: POST with retries and typed
//! classification of error responses.

use crate::retry::{RetryConfig, is_retryable};
use mcpchat_types::ApiError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

/// A reqwest client plus the retry policy applied to every request.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    retry_config: RetryConfig,
}

impl HttpBackend {
    pub fn new() -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            http,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// POST a JSON body and return the successful (streaming) response.
    ///
    /// Transient failures (429, 529, 5xx, network) are retried with backoff;
    /// anything else is returned immediately as a typed error.
    pub async fn post_json(
        &self,
        url: &str,
        mut headers: HeaderMap,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ApiError> {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = serde_json::to_string(body).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            tracing::debug!("POST {url} (attempt {}/{})", attempt + 1, max_retries + 1);

            let result = self
                .http
                .post(url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            let (err, retry_after) = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (classify_error(status, &body_text, retry_after), retry_after)
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            if !is_retryable(&err) || attempt >= max_retries {
                return Err(err);
            }

            let delay = self.retry_config.delay_for(attempt, retry_after);
            tracing::warn!(
                "Retryable upstream error (attempt {}/{}): {err}. Retrying in {}ms...",
                attempt + 1,
                max_retries,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Insert a header whose value comes from user input (credentials).
pub(crate) fn secret_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), ApiError> {
    let mut value = HeaderValue::from_str(value).map_err(|_| ApiError::Auth {
        message: "Invalid API key format".into(),
    })?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(())
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed ApiError.
///
/// All three providers wrap failures as `{"error": {"message": ...}}`;
/// anything else is passed through verbatim.
pub(crate) fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        529 => ApiError::Overloaded,
        _ => ApiError::Server { status, message },
    }
}
