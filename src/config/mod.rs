//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - JSON file loading
//! - Environment overrides (`SIGNCLIENT_*` for the client runtime,
//!   `SIGNSRV_*` for the sign service)
//! - Defaults matching the documented option surface

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::PlatformProfile;
use crate::signing::{Platform, XhsClientProfile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxySelectionStrategy {
    #[default]
    #[serde(alias = "round_robin", alias = "roundrobin")]
    RoundRobin,
    #[serde(alias = "random")]
    Random,
}

impl FromStr for ProxySelectionStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(other.to_string()),
        }
    }
}

/// Options recognised by the resilient client runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    #[serde(alias = "Timeout")]
    pub timeout_secs: u64,
    #[serde(alias = "MaxRetries")]
    pub max_retries: u32,
    #[serde(alias = "RetryDelayMs")]
    pub retry_delay_ms: u64,
    #[serde(alias = "MaxConcurrency")]
    pub max_concurrency: usize,
    #[serde(alias = "EnableRequestDeduplication")]
    pub enable_request_deduplication: bool,
    #[serde(alias = "DeduplicationCacheExpirySeconds")]
    pub deduplication_cache_expiry_seconds: u64,
    #[serde(alias = "EnableProxyPool")]
    pub enable_proxy_pool: bool,
    #[serde(alias = "ProxySelectionStrategy")]
    pub proxy_selection_strategy: ProxySelectionStrategy,
    #[serde(alias = "EnableCookieManagement")]
    pub enable_cookie_management: bool,
    #[serde(alias = "DefaultCookie")]
    pub default_cookie: Option<String>,
    #[serde(alias = "DefaultHeaders")]
    pub default_headers: HashMap<String, String>,
    #[serde(alias = "Proxies")]
    pub proxies: Vec<String>,
    /// Overrides for the built-in per-platform profiles.
    #[serde(alias = "Profiles")]
    pub profiles: Vec<PlatformProfile>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_concurrency: 10,
            enable_request_deduplication: false,
            deduplication_cache_expiry_seconds: 5,
            enable_proxy_pool: false,
            proxy_selection_strategy: ProxySelectionStrategy::RoundRobin,
            enable_cookie_management: true,
            default_cookie: None,
            default_headers: HashMap::new(),
            proxies: Vec::new(),
            profiles: Vec::new(),
        }
    }
}

impl ClientOptions {
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_json_str(&read_file(path.as_ref())?)
    }

    /// Override fields from `SIGNCLIENT_*` environment variables.
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Some(value) = env_parse("SIGNCLIENT_TIMEOUT")? {
            self.timeout_secs = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_MAX_RETRIES")? {
            self.max_retries = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_RETRY_DELAY_MS")? {
            self.retry_delay_ms = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_MAX_CONCURRENCY")? {
            self.max_concurrency = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_ENABLE_REQUEST_DEDUPLICATION")? {
            self.enable_request_deduplication = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_DEDUPLICATION_CACHE_EXPIRY_SECONDS")? {
            self.deduplication_cache_expiry_seconds = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_ENABLE_PROXY_POOL")? {
            self.enable_proxy_pool = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_PROXY_SELECTION_STRATEGY")? {
            self.proxy_selection_strategy = value;
        }
        if let Some(value) = env_parse("SIGNCLIENT_ENABLE_COOKIE_MANAGEMENT")? {
            self.enable_cookie_management = value;
        }
        if let Ok(proxies) = std::env::var("SIGNCLIENT_PROXIES") {
            self.proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn deduplication_ttl(&self) -> Duration {
        Duration::from_secs(self.deduplication_cache_expiry_seconds)
    }
}

/// Sandbox limits applied to each script VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmLimits {
    pub recursion_limit: usize,
    pub loop_iteration_limit: u64,
    /// Boa value-stack ceiling.
    pub stack_size_limit: usize,
    pub execution_timeout_ms: u64,
    /// Combined size of the string arguments passed into one call.
    pub max_input_bytes: usize,
    /// Native stack of the VM worker thread.
    pub thread_stack_bytes: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            recursion_limit: 512,
            loop_iteration_limit: 50_000_000,
            stack_size_limit: 10 * 1024,
            execution_timeout_ms: 5_000,
            max_input_bytes: 1024 * 1024,
            thread_stack_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignMode {
    #[default]
    Local,
    Remote,
}

impl FromStr for SignMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(other.to_string()),
        }
    }
}

/// Sign service and standalone sign server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignServiceConfig {
    pub mode: SignMode,
    /// Base URL of a remote sign server, e.g. `http://127.0.0.1:8989`.
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub script_dir: PathBuf,
    pub xhs_script: Option<PathBuf>,
    pub douyin_script: Option<PathBuf>,
    pub zhihu_script: Option<PathBuf>,
    pub vm_limits: VmLimits,
    pub xhs_profile: XhsClientProfile,
    pub fetch_wbi_keys: bool,
    pub wbi_nav_url: String,
    pub wbi_key_ttl_secs: u64,
    pub bind: String,
}

impl Default for SignServiceConfig {
    fn default() -> Self {
        Self {
            mode: SignMode::Local,
            endpoint: "http://127.0.0.1:8989".into(),
            request_timeout_secs: 10,
            script_dir: PathBuf::from("scripts"),
            xhs_script: None,
            douyin_script: None,
            zhihu_script: None,
            vm_limits: VmLimits::default(),
            xhs_profile: XhsClientProfile::default(),
            fetch_wbi_keys: true,
            wbi_nav_url: crate::signing::wbi::DEFAULT_NAV_URL.into(),
            wbi_key_ttl_secs: 600,
            bind: "0.0.0.0:8989".into(),
        }
    }
}

impl SignServiceConfig {
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_json_str(&read_file(path.as_ref())?)
    }

    /// Override fields from `SIGNSRV_*` environment variables.
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Some(value) = env_parse("SIGNSRV_MODE")? {
            self.mode = value;
        }
        if let Ok(value) = std::env::var("SIGNSRV_ENDPOINT") {
            self.endpoint = value;
        }
        if let Ok(value) = std::env::var("SIGNSRV_SCRIPT_DIR") {
            self.script_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("SIGNSRV_BIND") {
            self.bind = value;
        }
        if let Ok(value) = std::env::var("SIGNSRV_XHS_B1") {
            self.xhs_profile.b1 = value;
        }
        if let Some(value) = env_parse("SIGNSRV_FETCH_WBI_KEYS")? {
            self.fetch_wbi_keys = value;
        }
        if let Some(value) = env_parse("SIGNSRV_VM_TIMEOUT_MS")? {
            self.vm_limits.execution_timeout_ms = value;
        }
        Ok(self)
    }

    /// Script path for a VM-backed platform: explicit override, else
    /// `<script_dir>/<platform>.js`.
    pub fn script_path(&self, platform: Platform) -> PathBuf {
        let explicit = match platform {
            Platform::Xhs => self.xhs_script.as_ref(),
            Platform::Douyin => self.douyin_script.as_ref(),
            Platform::Zhihu => self.zhihu_script.as_ref(),
            Platform::Bilibili => None,
        };
        explicit
            .cloned()
            .unwrap_or_else(|| self.script_dir.join(format!("{}.js", platform.as_str())))
    }

    pub fn wbi_key_ttl(&self) -> Duration {
        Duration::from_secs(self.wbi_key_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn read_file(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn env_parse<T: FromStr>(key: &str) -> ConfigResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
