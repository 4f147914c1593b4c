// Outbound transport seam.
// The dispatcher sends (method, url, params) through this trait and receives a raw JSON body.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

use super::descriptor::{Method, RequestDescriptor};

/// The wire-level part of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub params: Value,
}

impl From<&RequestDescriptor> for TransportRequest {
    fn from(descriptor: &RequestDescriptor) -> Self {
        Self {
            method: descriptor.method,
            url: descriptor.url.clone(),
            params: descriptor.params.clone(),
        }
    }
}

/// Anything that can carry a request to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<Value>;
}
