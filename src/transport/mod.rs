//! HTTP transport seam.
//!
//! The client runtime talks to the network only through [`HttpTransport`], so
//! tests can swap in stubs and the reqwest adapter stays a thin conversion
//! layer.

pub mod reqwest_client;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use url::Url;

use crate::modules::proxy::ProxyDescriptor;

pub use reqwest_client::ReqwestTransport;

/// Fully prepared outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub proxy: Option<ProxyDescriptor>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects.
    pub url: Url,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request could not be built or followed; retrying will not help.
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
