//! # signclient-rs
//!
//! A resilient HTTP client runtime for consumer web platforms that guard
//! their private APIs with request signatures.
//!
//! ## Features
//!
//! - Native Bilibili WBI signing with cached, self-refreshing keys
//! - Xiaohongshu hybrid signing (embedded script plus native `x-s-common`)
//! - Douyin and Zhihu signing through a sandboxed JavaScript VM
//! - Local or remote sign service behind one trait, plus a standalone server
//! - Bounded concurrency, retry with exponential backoff and cancellation
//! - Request deduplication, per-domain cookie jar, account and proxy rotation
//! - Before/after interceptors for logging and metrics
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use signclient_rs::{
//!     BilibiliSignRequest, ClientRequest, LocalSignService, Platform, ResilientClient,
//!     SignService, SigningEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signer = LocalSignService::new(Arc::new(SigningEngine::builder().build()));
//!     let mut request = BilibiliSignRequest::default();
//!     request.req_data.insert("mid".into(), "2".into());
//!     let signature = signer.bilibili_sign(request.clone()).await?;
//!
//!     let mut params = request.req_data;
//!     signature.apply_params(&mut params);
//!     let query = encode_query(&params);
//!
//!     let client = ResilientClient::builder().build()?;
//!     let response = client
//!         .execute(
//!             ClientRequest::get(format!("https://api.bilibili.com/x/space/wbi/acc/info?{query}"))
//!                 .for_platform(Platform::Bilibili),
//!         )
//!         .await?;
//!     println!("{} success={}", response.status(), response.is_successful());
//!     Ok(())
//! }
//!
//! fn encode_query(params: &std::collections::BTreeMap<String, String>) -> String {
//!     params
//!         .iter()
//!         .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
//!         .collect::<Vec<_>>()
//!         .join("&")
//! }
//! ```

pub mod client;
pub mod config;
pub mod external_deps;
pub mod modules;
pub mod sign_service;
pub mod signing;
pub mod transport;

pub use crate::client::{
    ApiResponse,
    AttemptError,
    AttemptOutcome,
    ClientError,
    ClientRequest,
    ClientResult,
    PlatformProfile,
    RequestFailure,
    ResilientClient,
    ResilientClientBuilder,
    SuccessPredicate,
};

pub use crate::config::{
    ClientOptions,
    ConfigError,
    ConfigResult,
    ProxySelectionStrategy,
    SignMode,
    SignServiceConfig,
    VmLimits,
};

pub use crate::external_deps::interpreters::{
    BoaScriptVm,
    InterpreterError,
    InterpreterResult,
    ScriptVm,
};

pub use crate::modules::{
    AccountPool,
    AccountRecord,
    AccountStatus,
    AccountStore,
    AccountStoreError,
    CookieJar,
    DedupCache,
    EndpointStats,
    Interceptor,
    InterceptorError,
    InterceptorPipeline,
    LoggingInterceptor,
    MemoryAccountStore,
    MetricsCollector,
    MetricsInterceptor,
    MetricsSnapshot,
    ProxyDescriptor,
    ProxyParseError,
    ProxyPool,
    RequestContext,
    RetryPolicy,
};

pub use crate::sign_service::{LocalSignService, RemoteSignService, SignEnvelope, SignService};

pub use crate::signing::{
    BilibiliSignRequest,
    BilibiliSignResult,
    DouyinSignRequest,
    DouyinSignResult,
    JsVmSigner,
    Platform,
    ScriptSource,
    SignError,
    SignResult,
    SigningEngine,
    SigningEngineBuilder,
    XhsSignRequest,
    XhsSignResult,
    ZhihuSignRequest,
    ZhihuSignResult,
};

pub use crate::transport::{
    HttpTransport,
    ReqwestTransport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
