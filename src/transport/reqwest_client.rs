//! Reqwest-backed implementation of [`HttpTransport`].
//!
//! Keeps one `reqwest::Client` per egress proxy. Cookies are handled by the
//! runtime's own jar, so the clients run without a cookie store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::modules::proxy::ProxyDescriptor;

pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<ProxyDescriptor>, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the direct (no proxy) slot with a preconfigured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        let mut clients = HashMap::new();
        clients.insert(None, client);
        Self {
            clients: Mutex::new(clients),
        }
    }

    async fn client(&self, proxy: Option<&ProxyDescriptor>) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.cloned();
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder();
        if let Some(descriptor) = proxy {
            let mut upstream = reqwest::Proxy::all(descriptor.url.as_str())
                .map_err(|err| TransportError::Invalid(err.to_string()))?;
            if let Some(credentials) = &descriptor.credentials {
                upstream = upstream.basic_auth(&credentials.username, &credentials.password);
            }
            builder = builder.proxy(upstream);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.proxy.as_ref()).await?;
        let timeout = request.timeout;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| classify(err, timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|err| classify(err, timeout))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

fn classify(err: reqwest::Error, timeout: std::time::Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() || err.is_redirect() {
        TransportError::Invalid(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
