//! Cross-cutting services module
//!
//! Pools, caches and hooks the client runtime is assembled from. Each module
//! is usable on its own.

pub mod accounts;
pub mod cookies;
pub mod dedup;
pub mod interceptors;
pub mod metrics;
pub mod proxy;
pub mod retry;

// Re-export commonly used types
pub use accounts::{
    AccountPool, AccountRecord, AccountStatus, AccountStore, AccountStoreError, MemoryAccountStore,
};
pub use cookies::CookieJar;
pub use dedup::DedupCache;
pub use interceptors::{
    Interceptor, InterceptorError, InterceptorPipeline, LoggingInterceptor, MetricsInterceptor,
    RequestContext,
};
pub use metrics::{EndpointStats, GlobalStats, MetricsCollector, MetricsSnapshot};
pub use proxy::{ProxyCredentials, ProxyDescriptor, ProxyParseError, ProxyPool};
pub use retry::RetryPolicy;
