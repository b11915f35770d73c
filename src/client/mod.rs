//! Resilient client runtime.
//!
//! Every call runs `dedup check -> before hooks -> gated execution with retry
//! -> after hooks`. The concurrency permit is an RAII guard, so it is released
//! on success, on retry exhaustion and on cancellation alike. After hooks run
//! for failed calls too.

mod error;
mod profile;
mod response;

pub use error::{AttemptError, AttemptOutcome, ClientError, ClientResult, RequestFailure};
pub use profile::{PlatformProfile, SuccessPredicate};
pub use response::ApiResponse;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientOptions;
use crate::modules::accounts::{AccountPool, AccountRecord};
use crate::modules::cookies::{CookieJar, merge_cookie_sources};
use crate::modules::dedup::DedupCache;
use crate::modules::interceptors::{
	Interceptor, InterceptorPipeline, LoggingInterceptor, MetricsInterceptor, RequestContext,
};
use crate::modules::metrics::MetricsCollector;
use crate::modules::proxy::{ProxyDescriptor, ProxyPool};
use crate::modules::retry::RetryPolicy;
use crate::sign_service::SignService;
use crate::signing::Platform;
use crate::transport::{HttpTransport, ReqwestTransport, TransportError, TransportRequest};

/// One logical HTTP call.
#[derive(Debug, Clone)]
pub struct ClientRequest {
	method: Method,
	url: String,
	headers: HeaderMap,
	cookie: Option<String>,
	body: Option<Bytes>,
	platform: Option<Platform>,
	use_account: bool,
	timeout: Option<Duration>,
}

impl ClientRequest {
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: HeaderMap::new(),
			cookie: None,
			body: None,
			platform: None,
			use_account: false,
			timeout: None,
		}
	}

	pub fn get(url: impl Into<String>) -> Self {
		Self::new(Method::GET, url)
	}

	pub fn post(url: impl Into<String>) -> Self {
		Self::new(Method::POST, url)
	}

	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);
		self
	}

	/// Merge a header map, e.g. one a sign result was applied to.
	pub fn with_headers(mut self, headers: HeaderMap) -> Self {
		for name in headers.keys() {
			self.headers.remove(name);
		}
		for (name, value) in &headers {
			self.headers.append(name.clone(), value.clone());
		}
		self
	}

	/// Per-call cookie; wins over account, default and jar cookies.
	pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
		self.cookie = Some(cookie.into());
		self
	}

	pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
		self.body = Some(body.into());
		self
	}

	pub fn with_json<T: Serialize + ?Sized>(mut self, payload: &T) -> ClientResult<Self> {
		let body = serde_json::to_vec(payload).map_err(|err| ClientError::Encode(err.to_string()))?;
		if !self.headers.contains_key(CONTENT_TYPE) {
			self.headers
				.insert(CONTENT_TYPE, HeaderValue::from_static("application/json;charset=UTF-8"));
		}
		self.body = Some(Bytes::from(body));
		Ok(self)
	}

	/// Apply the platform's profile headers and success predicate.
	pub fn for_platform(mut self, platform: Platform) -> Self {
		self.platform = Some(platform);
		self
	}

	/// Run the call with the next active account of `platform`.
	pub fn with_account(mut self, platform: Platform) -> Self {
		self.platform = Some(platform);
		self.use_account = true;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn method(&self) -> &Method {
		&self.method
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder {
	options: ClientOptions,
	transport: Option<Arc<dyn HttpTransport>>,
	accounts: Option<Arc<AccountPool>>,
	proxies: Option<Arc<ProxyPool>>,
	profiles: Vec<PlatformProfile>,
	interceptors: Vec<Arc<dyn Interceptor>>,
	metrics: Option<MetricsCollector>,
	sign_service: Option<Arc<dyn SignService>>,
	logging: bool,
}

impl ResilientClientBuilder {
	pub fn new() -> Self {
		Self {
			options: ClientOptions::default(),
			transport: None,
			accounts: None,
			proxies: None,
			profiles: Vec::new(),
			interceptors: Vec::new(),
			metrics: None,
			sign_service: None,
			logging: true,
		}
	}

	pub fn with_options(mut self, options: ClientOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_account_pool(mut self, accounts: Arc<AccountPool>) -> Self {
		self.accounts = Some(accounts);
		self
	}

	/// Use this pool for egress regardless of `enable_proxy_pool`.
	pub fn with_proxy_pool(mut self, proxies: Arc<ProxyPool>) -> Self {
		self.proxies = Some(proxies);
		self
	}

	pub fn with_profile(mut self, profile: PlatformProfile) -> Self {
		self.profiles.push(profile);
		self
	}

	pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
		self.interceptors.push(interceptor);
		self
	}

	/// Record per-endpoint metrics into `metrics`.
	pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
		self.metrics = Some(metrics);
		self
	}

	pub fn with_sign_service(mut self, service: Arc<dyn SignService>) -> Self {
		self.sign_service = Some(service);
		self
	}

	pub fn without_logging(mut self) -> Self {
		self.logging = false;
		self
	}

	pub fn build(self) -> ClientResult<ResilientClient> {
		let options = self.options;
		let default_headers = to_header_map(&options.default_headers)?;

		let proxies = match self.proxies {
			Some(pool) => Some(pool),
			None if options.enable_proxy_pool => Some(Arc::new(ProxyPool::from_strings(
				options.proxy_selection_strategy,
				&options.proxies,
			))),
			None => None,
		};

		let mut profiles: HashMap<Platform, PlatformProfile> = Platform::ALL
			.iter()
			.map(|platform| (*platform, PlatformProfile::for_platform(*platform)))
			.collect();
		for profile in options.profiles.iter().cloned().chain(self.profiles) {
			profiles.insert(profile.platform, profile);
		}

		let mut interceptors = InterceptorPipeline::new();
		if self.logging {
			interceptors.register(Arc::new(LoggingInterceptor));
		}
		if let Some(metrics) = &self.metrics {
			interceptors.register(Arc::new(MetricsInterceptor::new(metrics.clone())));
		}
		for interceptor in self.interceptors {
			interceptors.register(interceptor);
		}

		let transport = self
			.transport
			.unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

		Ok(ResilientClient {
			gate: Semaphore::new(options.max_concurrency.max(1)),
			retry: RetryPolicy::new(options.max_retries, options.retry_delay()),
			dedup: options
				.enable_request_deduplication
				.then(|| DedupCache::new(options.deduplication_ttl())),
			cookies: CookieJar::new(),
			accounts: self.accounts,
			proxies,
			profiles,
			default_headers,
			interceptors,
			metrics: self.metrics,
			sign_service: self.sign_service,
			transport,
			options,
		})
	}
}

impl Default for ResilientClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Request executor with bounded concurrency, retry, dedup and cookie
/// handling.
pub struct ResilientClient {
	options: ClientOptions,
	transport: Arc<dyn HttpTransport>,
	gate: Semaphore,
	retry: RetryPolicy,
	dedup: Option<DedupCache>,
	cookies: CookieJar,
	accounts: Option<Arc<AccountPool>>,
	proxies: Option<Arc<ProxyPool>>,
	profiles: HashMap<Platform, PlatformProfile>,
	default_headers: HeaderMap,
	interceptors: InterceptorPipeline,
	metrics: Option<MetricsCollector>,
	sign_service: Option<Arc<dyn SignService>>,
}

impl ResilientClient {
	pub fn new(options: ClientOptions) -> ClientResult<Self> {
		Self::builder().with_options(options).build()
	}

	pub fn builder() -> ResilientClientBuilder {
		ResilientClientBuilder::new()
	}

	pub fn options(&self) -> &ClientOptions {
		&self.options
	}

	pub fn cookies(&self) -> &CookieJar {
		&self.cookies
	}

	pub fn metrics(&self) -> Option<&MetricsCollector> {
		self.metrics.as_ref()
	}

	pub fn accounts(&self) -> Option<&Arc<AccountPool>> {
		self.accounts.as_ref()
	}

	pub fn proxies(&self) -> Option<&Arc<ProxyPool>> {
		self.proxies.as_ref()
	}

	pub fn sign_service(&self) -> Option<&Arc<dyn SignService>> {
		self.sign_service.as_ref()
	}

	pub fn profile(&self, platform: Platform) -> Option<&PlatformProfile> {
		self.profiles.get(&platform)
	}

	/// Free slots of the concurrency gate.
	pub fn available_permits(&self) -> usize {
		self.gate.available_permits()
	}

	pub async fn execute(&self, request: ClientRequest) -> ClientResult<ApiResponse> {
		self.execute_with_cancel(request, &CancellationToken::new())
			.await
	}

	/// Execute and decode the body as JSON.
	pub async fn execute_as_json<T: DeserializeOwned>(
		&self,
		request: ClientRequest,
	) -> ClientResult<T> {
		self.execute(request).await?.json()
	}

	/// Execute, aborting promptly once `cancel` fires.
	pub async fn execute_with_cancel(
		&self,
		request: ClientRequest,
		cancel: &CancellationToken,
	) -> ClientResult<ApiResponse> {
		let url = Url::parse(&request.url)?;

		if let Some(dedup) = &self.dedup
			&& !dedup.check_and_insert(request.method.as_str(), url.as_str())
		{
			log::debug!("rejecting duplicate {} {}", request.method, url);
			return Err(ClientError::Duplicate {
				method: request.method.to_string(),
				url: url.to_string(),
			});
		}

		let mut ctx = RequestContext::new(request.method.clone(), url);
		ctx.platform = request.platform;
		ctx.request_body = request.body.clone();
		self.interceptors.before_call(&mut ctx);

		let result = self.run(&request, &mut ctx, cancel).await;

		ctx.finish();
		if let Err(err) = &result {
			ctx.error = Some(err.to_string());
		}
		self.interceptors.after_call(&ctx);
		result
	}

	async fn run(
		&self,
		request: &ClientRequest,
		ctx: &mut RequestContext,
		cancel: &CancellationToken,
	) -> ClientResult<ApiResponse> {
		let correlation_id = ctx.correlation_id;
		let cancelled = || ClientError::Cancelled { correlation_id };

		let _permit = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(cancelled()),
			permit = self.gate.acquire() => permit.map_err(|_| cancelled())?,
		};

		let mut account = self.resolve_account(request)?;
		let (mut proxy, mut pooled) = self.egress_for(account.as_ref(), ctx)?;

		let timeout = request.timeout.unwrap_or_else(|| self.options.timeout());
		let mut attempt = 0u32;

		let last = loop {
			attempt += 1;
			ctx.attempts = attempt;
			ctx.proxy = proxy.as_ref().map(|descriptor| descriptor.url.clone());

			let transport_request = TransportRequest {
				method: request.method.clone(),
				url: ctx.url.clone(),
				headers: self.prepare_headers(request, account.as_ref(), &ctx.url)?,
				body: request.body.clone(),
				proxy: proxy.clone(),
				timeout,
			};

			let result = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(cancelled()),
				result = self.transport.send(transport_request) => result,
			};

			ctx.status = result.as_ref().ok().map(|response| response.status);
			if let Ok(response) = &result {
				ctx.response_body = Some(response.body.clone());
				self.store_cookies(&response.url, &response.headers);
			}

			let error = match AttemptOutcome::classify(result) {
				AttemptOutcome::Success(response) => {
					let predicate = request
						.platform
						.and_then(|platform| self.profiles.get(&platform))
						.map(|profile| profile.success)
						.unwrap_or_default();
					return Ok(ApiResponse::new(
						response.status,
						response.headers,
						response.body,
						response.url,
						predicate,
						correlation_id,
						attempt,
						ctx.started_at.elapsed(),
					));
				}
				AttemptOutcome::Fatal(error) => break error,
				AttemptOutcome::Transient(error) => error,
			};

			self.on_transient_failure(&error, request, account.as_ref(), &mut proxy, pooled);

			if !self.retry.should_retry(attempt) {
				break error;
			}

			// A rate-limited account left rotation; retry with the next one.
			if error.status() == Some(429)
				&& account.is_some()
				&& let Some(next) = self.resolve_account(request).ok().flatten()
			{
				log::info!("[{correlation_id}] switching to account {} after 429", next.id);
				account = Some(next);
				(proxy, pooled) = self.egress_for(account.as_ref(), ctx)?;
			}
			let delay = self.retry.delay_for(attempt);
			log::warn!(
				"[{correlation_id}] attempt {attempt} failed ({error}), retrying in {:.2}s",
				delay.as_secs_f64()
			);
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(cancelled()),
				_ = tokio::time::sleep(delay) => {}
			}
		};

		Err(ClientError::Exhausted(Box::new(RequestFailure {
			correlation_id,
			elapsed: ctx.started_at.elapsed(),
			attempts: attempt,
			last,
		})))
	}

	fn resolve_account(&self, request: &ClientRequest) -> ClientResult<Option<AccountRecord>> {
		if !request.use_account {
			return Ok(None);
		}
		let Some(platform) = request.platform else {
			return Ok(None);
		};
		self.accounts
			.as_ref()
			.and_then(|pool| pool.get_with_proxy(platform))
			.map(Some)
			.ok_or(ClientError::NoAccountAvailable(platform))
	}

	/// Proxy for the attempt: the account's own proxy, else the next pool
	/// proxy. The flag tells whether it came from the pool.
	fn egress_for(
		&self,
		account: Option<&AccountRecord>,
		ctx: &mut RequestContext,
	) -> ClientResult<(Option<ProxyDescriptor>, bool)> {
		ctx.account_id = account.map(|record| record.id.clone());
		let account_proxy = account
			.and_then(|record| record.proxy_url.as_deref())
			.and_then(|raw| match ProxyDescriptor::parse(raw) {
				Ok(descriptor) => Some(descriptor),
				Err(err) => {
					log::warn!("[{}] ignoring account proxy: {err}", ctx.correlation_id);
					None
				}
			});
		match account_proxy {
			Some(descriptor) => Ok((Some(descriptor), false)),
			None => Ok((self.next_pool_proxy()?, true)),
		}
	}

	fn next_pool_proxy(&self) -> ClientResult<Option<ProxyDescriptor>> {
		match &self.proxies {
			Some(pool) => pool.get_next().map(Some).ok_or(ClientError::NoProxyAvailable),
			None => Ok(None),
		}
	}

	fn on_transient_failure(
		&self,
		error: &AttemptError,
		request: &ClientRequest,
		account: Option<&AccountRecord>,
		proxy: &mut Option<ProxyDescriptor>,
		pooled: bool,
	) {
		if error.status() == Some(429)
			&& let (Some(pool), Some(record), Some(platform)) =
				(&self.accounts, account, request.platform)
		{
			pool.mark_rate_limited(platform, &record.id);
		}

		if let AttemptError::Transport(TransportError::Connect(_)) = error
			&& pooled
			&& let (Some(pool), Some(current)) = (&self.proxies, proxy.as_ref())
		{
			pool.mark_unavailable(&current.url);
			if let Some(next) = pool.get_next() {
				*proxy = Some(next);
			}
		}
	}

	/// Explicit request headers, then profile headers, then client defaults;
	/// the cookie header is merged separately by precedence.
	fn prepare_headers(
		&self,
		request: &ClientRequest,
		account: Option<&AccountRecord>,
		url: &Url,
	) -> ClientResult<HeaderMap> {
		let mut headers = request.headers.clone();
		let explicit_cookie = request.cookie.clone().or_else(|| {
			headers
				.get(COOKIE)
				.and_then(|value| value.to_str().ok())
				.map(String::from)
		});

		if let Some(profile) = request.platform.and_then(|platform| self.profiles.get(&platform)) {
			profile.decorate(&mut headers)?;
		}
		for (name, value) in &self.default_headers {
			if !headers.contains_key(name) {
				headers.insert(name.clone(), value.clone());
			}
		}

		let jar_cookie = if self.options.enable_cookie_management {
			url.host_str()
				.and_then(|host| self.cookies.cookie_header(host))
		} else {
			None
		};
		let merged = merge_cookie_sources([
			explicit_cookie.as_deref(),
			account.map(|record| record.cookies.as_str()),
			self.options.default_cookie.as_deref(),
			jar_cookie.as_deref(),
		]);
		headers.remove(COOKIE);
		if let Some(cookie) = merged {
			let value = HeaderValue::from_str(&cookie)
				.map_err(|err| ClientError::InvalidHeader(format!("cookie: {err}")))?;
			headers.insert(COOKIE, value);
		}
		Ok(headers)
	}

	fn store_cookies(&self, url: &Url, headers: &HeaderMap) {
		if !self.options.enable_cookie_management {
			return;
		}
		if let Some(host) = url.host_str() {
			self.cookies.store_from_headers(host, headers);
		}
	}
}

fn to_header_map(raw: &HashMap<String, String>) -> ClientResult<HeaderMap> {
	let mut headers = HeaderMap::new();
	for (name, value) in raw {
		let name = HeaderName::from_bytes(name.as_bytes())
			.map_err(|err| ClientError::InvalidHeader(format!("{name}: {err}")))?;
		let value = HeaderValue::from_str(value)
			.map_err(|err| ClientError::InvalidHeader(format!("{name}: {err}")))?;
		headers.insert(name, value);
	}
	Ok(headers)
}
