// Request descriptors.
// Immutable descriptions of one logical API call, its caching hints, and its invalidation set.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{CacheKey, ErrorRecord, fingerprint};
use crate::error::{ApiError, Result};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Whether params travel in the query string rather than the body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(ApiError::Config(format!("unsupported method {}", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a raw response body becomes the stored payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SuccessTransform {
    /// Store the body as received.
    #[default]
    Identity,
    /// Store the value at a JSON pointer; a missing value is a transform error.
    Pointer(String),
    /// Store the value at a JSON pointer, or the fallback when it is missing.
    PointerOr { pointer: String, fallback: Value },
}

impl SuccessTransform {
    pub fn apply(&self, raw: Value) -> Result<Value> {
        match self {
            SuccessTransform::Identity => Ok(raw),
            SuccessTransform::Pointer(pointer) => raw
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| ApiError::Transform(format!("no value at {}", pointer))),
            SuccessTransform::PointerOr { pointer, fallback } => {
                Ok(raw.pointer(pointer).cloned().unwrap_or_else(|| fallback.clone()))
            }
        }
    }
}

/// How a failure becomes the error record stored on the entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ErrorTransform {
    /// Record the error message as produced.
    #[default]
    Verbatim,
    /// Record a fixed message, keeping status and retryability.
    Message(String),
}

impl ErrorTransform {
    pub fn apply(&self, error: &ApiError, at: DateTime<Utc>) -> ErrorRecord {
        let message = match self {
            ErrorTransform::Verbatim => error.to_string(),
            ErrorTransform::Message(message) => message.clone(),
        };
        ErrorRecord {
            message,
            status: error.status(),
            retryable: error.is_retryable(),
            occurred_at: at,
        }
    }
}

/// Description of one logical API call.
///
/// The label names the endpoint, not the URL. It must keep one meaning for
/// the life of the application since it identifies the cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub label: String,
    /// Optional scope (e.g. organization id) that gives this call its own entry.
    pub scope: Option<String>,
    pub url: String,
    pub method: Method,
    pub params: Value,
    /// Overrides `params` as the fingerprint source.
    pub fingerprint_input: Option<Value>,
    /// Absent means cached until invalidated.
    pub ttl: Option<Duration>,
    /// Labels marked stale when this request succeeds.
    pub invalidates: BTreeSet<String>,
    /// Issue a new network call even when one is already in flight.
    pub allow_concurrent: bool,
    pub on_success: SuccessTransform,
    pub on_error: ErrorTransform,
}

impl RequestDescriptor {
    pub fn new(label: impl Into<String>, method: Method, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scope: None,
            url: url.into(),
            method,
            params: Value::Object(Map::new()),
            fingerprint_input: None,
            ttl: None,
            invalidates: BTreeSet::new(),
            allow_concurrent: false,
            on_success: SuccessTransform::default(),
            on_error: ErrorTransform::default(),
        }
    }

    pub fn get(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(label, Method::Get, url)
    }

    pub fn post(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(label, Method::Post, url)
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set a single parameter. Non-object params are replaced by an object.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.params.is_object() {
            self.params = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.params {
            map.insert(name.into(), value.into());
        }
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_fingerprint_input(mut self, input: Value) -> Self {
        self.fingerprint_input = Some(input);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn invalidating<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidates.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn allow_concurrent(mut self) -> Self {
        self.allow_concurrent = true;
        self
    }

    pub fn on_success(mut self, transform: SuccessTransform) -> Self {
        self.on_success = transform;
        self
    }

    pub fn on_error(mut self, transform: ErrorTransform) -> Self {
        self.on_error = transform;
        self
    }

    /// Cache key for this request.
    pub fn key(&self) -> CacheKey {
        CacheKey {
            label: self.label.clone(),
            scope: self.scope.clone(),
        }
    }

    /// Fingerprint of `fingerprint_input`, falling back to `params`.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.fingerprint_input.as_ref().unwrap_or(&self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults() {
        let descriptor = RequestDescriptor::get("pools", "/organizations/o1/pools");

        assert_eq!(descriptor.method, Method::Get);
        assert_eq!(descriptor.params, json!({}));
        assert!(descriptor.ttl.is_none());
        assert!(descriptor.invalidates.is_empty());
        assert!(!descriptor.allow_concurrent);
        assert_eq!(descriptor.key(), CacheKey::new("pools"));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
        assert!(Method::Get.uses_query());
        assert!(!Method::Post.uses_query());
    }

    #[test]
    fn test_fingerprint_input_overrides_params() {
        let a = RequestDescriptor::get("expenses", "/expenses")
            .with_param("start", 1)
            .with_param("nonce", "x")
            .with_fingerprint_input(json!({"start": 1}));
        let b = RequestDescriptor::get("expenses", "/expenses")
            .with_param("start", 1)
            .with_param("nonce", "y")
            .with_fingerprint_input(json!({"start": 1}));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.params, b.params);
    }

    #[test]
    fn test_scope_is_part_of_key() {
        let descriptor = RequestDescriptor::get("pools", "/pools").with_scope("o1");
        assert_eq!(descriptor.key(), CacheKey::scoped("pools", "o1"));
    }

    #[test]
    fn test_pointer_transform() {
        let raw = json!({"data": {"pools": [1, 2]}});

        assert_eq!(
            SuccessTransform::Pointer("/data/pools".to_string())
                .apply(raw.clone())
                .unwrap(),
            json!([1, 2])
        );
        assert!(matches!(
            SuccessTransform::Pointer("/missing".to_string()).apply(raw.clone()),
            Err(ApiError::Transform(_))
        ));
        assert_eq!(
            SuccessTransform::PointerOr {
                pointer: "/missing".to_string(),
                fallback: json!([])
            }
            .apply(raw)
            .unwrap(),
            json!([])
        );
    }

    #[test]
    fn test_error_transform_keeps_status() {
        let error = ApiError::Http {
            status: 503,
            message: "unavailable".to_string(),
        };
        let record =
            ErrorTransform::Message("Pools are unavailable".to_string()).apply(&error, Utc::now());

        assert_eq!(record.message, "Pools are unavailable");
        assert_eq!(record.status, Some(503));
        assert!(record.retryable);
    }

    #[test]
    fn test_descriptor_serializes() {
        let descriptor = RequestDescriptor::post("createPool", "/pools")
            .with_param("name", "dev")
            .invalidating(["pools"])
            .on_success(SuccessTransform::Pointer("/pool".to_string()));

        let json = serde_json::to_string(&descriptor).unwrap();
        let back: RequestDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }
}
