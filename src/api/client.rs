// FinOps REST API HTTP client.
// Handles authentication, rate limit tracking, and request/response processing.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, Response, StatusCode, Url,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{ApiError, Result};

use super::descriptor::Method;
use super::transport::{Transport, TransportRequest};

/// Rate limit information from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
}

/// HTTP transport for the cost-management REST API.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    rate_limit: Mutex<RateLimit>,
}

impl HttpTransport {
    /// Create a client for `base_url`, authenticating with `token` when given.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid base url {}: {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| ApiError::Config(e.to_string()))?,
            );
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("finops-api"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            rate_limit: Mutex::new(RateLimit::default()),
        })
    }

    /// Create a client from loaded configuration.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(&config.base_url, config.token.as_deref(), config.timeout())
    }

    /// Get the most recent rate limit information.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Resolve an endpoint path against the base URL.
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    /// Update rate limit from response headers.
    fn update_rate_limit(&self, response: &Response) {
        let header = |name: &str| -> Option<u64> {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        };

        let mut rate_limit = self.rate_limit.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = header("x-ratelimit-limit") {
            rate_limit.limit = limit;
        }
        if let Some(remaining) = header("x-ratelimit-remaining") {
            rate_limit.remaining = remaining;
        }
        if let Some(reset) = header("x-ratelimit-reset") {
            rate_limit.reset = reset;
        }
    }

    /// Check response status and convert errors.
    async fn check_response(&self, response: Response) -> Result<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(response.url().to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited {
                reset_at: self.reset_display(),
            }),
            StatusCode::FORBIDDEN if self.rate_limit().remaining == 0 && self.rate_limit().limit > 0 => {
                Err(ApiError::RateLimited {
                    reset_at: self.reset_display(),
                })
            }
            status => Err(ApiError::Http {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn reset_display(&self) -> String {
        chrono::DateTime::from_timestamp(self.rate_limit().reset as i64, 0)
            .map(|dt| dt.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value> {
        let url = self.endpoint(&request.url)?;
        debug!(method = %request.method, url = %url, "sending request");

        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Delete => self.client.delete(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
        };
        let builder = if request.method.uses_query() {
            builder.query(&query_pairs(&request.params))
        } else {
            builder.json(&request.params)
        };

        let response = builder.send().await?;
        self.update_rate_limit(&response);
        let response = self.check_response(response).await?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Flatten an object of params into query pairs.
///
/// Null members are skipped, arrays repeat the key, and nested objects are
/// sent as JSON text.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_text(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
