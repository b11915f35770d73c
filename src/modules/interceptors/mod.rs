//! Before/after hooks around every client call.
//!
//! Hooks observe a per-call [`RequestContext`]. A hook that errors or panics is
//! logged and skipped; it never aborts the call.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Method;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::metrics::MetricsCollector;
use crate::signing::Platform;

/// State of one logical call, created fresh per request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub method: Method,
    pub url: Url,
    /// Metrics key, `METHOD host/path`.
    pub endpoint: String,
    pub platform: Option<Platform>,
    pub account_id: Option<String>,
    pub proxy: Option<String>,
    pub started_at: Instant,
    pub request_body: Option<Bytes>,
    pub status: Option<u16>,
    pub response_body: Option<Bytes>,
    pub error: Option<String>,
    pub attempts: u32,
    pub elapsed: Option<Duration>,
}

impl RequestContext {
    pub fn new(method: Method, url: Url) -> Self {
        let endpoint = format!("{method} {}{}", url.host_str().unwrap_or_default(), url.path());
        Self {
            correlation_id: Uuid::new_v4(),
            method,
            url,
            endpoint,
            platform: None,
            account_id: None,
            proxy: None,
            started_at: Instant::now(),
            request_body: None,
            status: None,
            response_body: None,
            error: None,
            attempts: 0,
            elapsed: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    pub(crate) fn finish(&mut self) {
        self.elapsed = Some(self.started_at.elapsed());
    }
}

#[derive(Debug, Error)]
#[error("interceptor failed: {0}")]
pub struct InterceptorError(pub String);

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn before_call(&self, _ctx: &mut RequestContext) -> Result<(), InterceptorError> {
        Ok(())
    }

    fn after_call(&self, _ctx: &RequestContext) -> Result<(), InterceptorError> {
        Ok(())
    }
}

/// Ordered interceptor list.
#[derive(Default, Clone)]
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn before_call(&self, ctx: &mut RequestContext) {
        for interceptor in &self.interceptors {
            let outcome = catch_unwind(AssertUnwindSafe(|| interceptor.before_call(ctx)));
            report(interceptor.name(), "before_call", ctx.correlation_id, outcome);
        }
    }

    pub fn after_call(&self, ctx: &RequestContext) {
        for interceptor in &self.interceptors {
            let outcome = catch_unwind(AssertUnwindSafe(|| interceptor.after_call(ctx)));
            report(interceptor.name(), "after_call", ctx.correlation_id, outcome);
        }
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("InterceptorPipeline")
            .field("interceptors", &names)
            .finish()
    }
}

fn report(
    name: &str,
    hook: &str,
    correlation_id: Uuid,
    outcome: std::thread::Result<Result<(), InterceptorError>>,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::warn!("[{correlation_id}] {name}::{hook}: {err}"),
        Err(_) => log::warn!("[{correlation_id}] {name}::{hook} panicked"),
    }
}

/// Logs each call through the `log` crate.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &str {
        "logging"
    }

    fn before_call(&self, ctx: &mut RequestContext) -> Result<(), InterceptorError> {
        log::debug!("[{}] -> {} {}", ctx.correlation_id, ctx.method, ctx.url);
        Ok(())
    }

    fn after_call(&self, ctx: &RequestContext) -> Result<(), InterceptorError> {
        let elapsed = ctx.elapsed().as_secs_f64();
        match (&ctx.error, ctx.status) {
            (None, status) => log::debug!(
                "[{}] <- {} {} -> {} ({elapsed:.2}s)",
                ctx.correlation_id,
                ctx.method,
                ctx.url,
                status.unwrap_or_default()
            ),
            (Some(err), _) => log::warn!(
                "[{}] {} {} failed after {} attempt(s) ({elapsed:.2}s): {err}",
                ctx.correlation_id,
                ctx.method,
                ctx.url,
                ctx.attempts
            ),
        }
        Ok(())
    }
}

/// Feeds the metrics collector after each call.
#[derive(Clone, Debug)]
pub struct MetricsInterceptor {
    metrics: MetricsCollector,
}

impl MetricsInterceptor {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &str {
        "metrics"
    }

    fn after_call(&self, ctx: &RequestContext) -> Result<(), InterceptorError> {
        self.metrics
            .record(&ctx.endpoint, ctx.is_success(), ctx.status, ctx.elapsed());
        Ok(())
    }
}
