//! Per-platform account rotation.
//!
//! Accounts are selected round-robin among `Active` records only. Selection
//! does not lock an account exclusively: with fewer accounts than concurrent
//! callers, the same account may be handed out more than once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::proxy::ProxyPool;
use crate::signing::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Invalid,
    RateLimited,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    pub platform: Platform,
    pub cookies: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AccountRecord {
    pub fn new(id: impl Into<String>, platform: Platform, cookies: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform,
            cookies: cookies.into(),
            proxy_url: None,
            status: AccountStatus::Active,
            last_used_at: None,
            failure_count: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("account store unavailable: {0}")]
    Unavailable(String),
    #[error("account store serialization error: {0}")]
    Serialization(String),
}

/// Persistence boundary for account records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self, platform: Platform) -> Result<Vec<AccountRecord>, AccountStoreError>;

    async fn save(&self, record: &AccountRecord) -> Result<(), AccountStoreError>;
}

/// In-process store, mostly useful for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    records: Mutex<HashMap<(Platform, String), AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = AccountRecord>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.records.lock().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                guard.insert((record.platform, record.id.clone()), record);
            }
        }
        store
    }

    pub fn get(&self, platform: Platform, id: &str) -> Option<AccountRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(platform, id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self, platform: Platform) -> Result<Vec<AccountRecord>, AccountStoreError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<AccountRecord> = guard
            .values()
            .filter(|record| record.platform == platform)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn save(&self, record: &AccountRecord) -> Result<(), AccountStoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((record.platform, record.id.clone()), record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PlatformAccounts {
    records: Vec<AccountRecord>,
    cursor: usize,
}

impl PlatformAccounts {
    fn next_active(&mut self) -> Option<&mut AccountRecord> {
        let len = self.records.len();
        let offset = (0..len).find(|step| self.records[(self.cursor + step) % len].is_active())?;
        let index = (self.cursor + offset) % len;
        self.cursor = (index + 1) % len;
        Some(&mut self.records[index])
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut AccountRecord> {
        self.records.iter_mut().find(|record| record.id == id)
    }
}

/// Thread-safe pool of accounts keyed by platform.
pub struct AccountPool {
    accounts: Mutex<HashMap<Platform, PlatformAccounts>>,
    proxies: Option<Arc<ProxyPool>>,
    store: Option<Arc<dyn AccountStore>>,
}

impl AccountPool {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            proxies: None,
            store: None,
        }
    }

    pub fn with_proxy_pool(mut self, proxies: Arc<ProxyPool>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Platform, PlatformAccounts>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a platform's accounts with what the store holds. Returns the
    /// number of records loaded; without a store this is a no-op.
    pub async fn hydrate(&self, platform: Platform) -> Result<usize, AccountStoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = store.load(platform).await?;
        let count = records.len();
        self.lock().insert(
            platform,
            PlatformAccounts {
                records,
                cursor: 0,
            },
        );
        log::info!("hydrated {count} {platform} accounts");
        Ok(count)
    }

    /// Add or replace an account by id.
    pub fn add_account(&self, record: AccountRecord) {
        let mut guard = self.lock();
        let entry = guard.entry(record.platform).or_default();
        match entry.find_mut(&record.id) {
            Some(existing) => *existing = record,
            None => entry.records.push(record),
        }
    }

    pub fn accounts(&self, platform: Platform) -> Vec<AccountRecord> {
        self.lock()
            .get(&platform)
            .map(|entry| entry.records.clone())
            .unwrap_or_default()
    }

    pub fn active_count(&self, platform: Platform) -> usize {
        self.lock()
            .get(&platform)
            .map(|entry| entry.records.iter().filter(|r| r.is_active()).count())
            .unwrap_or(0)
    }

    /// Next `Active` account for the platform, round-robin.
    pub fn get_next(&self, platform: Platform) -> Option<AccountRecord> {
        let mut guard = self.lock();
        let record = guard.get_mut(&platform)?.next_active()?;
        record.last_used_at = Some(Utc::now());
        Some(record.clone())
    }

    /// Like [`get_next`](Self::get_next), binding a proxy from the proxy pool
    /// the first time an account without one is selected.
    pub fn get_with_proxy(&self, platform: Platform) -> Option<AccountRecord> {
        let mut guard = self.lock();
        let record = guard.get_mut(&platform)?.next_active()?;
        record.last_used_at = Some(Utc::now());
        if record.proxy_url.is_none()
            && let Some(proxy) = self.proxies.as_ref().and_then(|pool| pool.get_next())
        {
            log::debug!("binding {platform} account {} to {}", record.id, proxy.url);
            record.proxy_url = Some(proxy.to_url_with_credentials());
        }
        Some(record.clone())
    }

    /// Permanently retire an account. Persisted through the store when one is
    /// configured; store failures are logged, the in-memory state still wins.
    pub async fn mark_invalid(&self, platform: Platform, id: &str) -> bool {
        let updated = self.update(platform, id, |record| {
            record.status = AccountStatus::Invalid;
            record.failure_count += 1;
        });
        let Some(record) = updated else {
            return false;
        };
        log::warn!("{platform} account {id} marked invalid");
        if let Some(store) = &self.store
            && let Err(err) = store.save(&record).await
        {
            log::error!("failed to persist {platform} account {id}: {err}");
        }
        true
    }

    pub fn mark_rate_limited(&self, platform: Platform, id: &str) -> bool {
        let updated = self.update(platform, id, |record| {
            if record.status == AccountStatus::Active {
                record.status = AccountStatus::RateLimited;
                record.failure_count += 1;
            }
        });
        if updated.is_some() {
            log::info!("{platform} account {id} rate limited");
        }
        updated.is_some()
    }

    /// Return every rate-limited account of the platform to rotation.
    /// Invalid and disabled accounts stay out.
    pub fn restore_rate_limited(&self, platform: Platform) -> usize {
        let mut guard = self.lock();
        let Some(entry) = guard.get_mut(&platform) else {
            return 0;
        };
        let mut restored = 0;
        for record in entry
            .records
            .iter_mut()
            .filter(|record| record.status == AccountStatus::RateLimited)
        {
            record.status = AccountStatus::Active;
            restored += 1;
        }
        restored
    }

    fn update(
        &self,
        platform: Platform,
        id: &str,
        apply: impl FnOnce(&mut AccountRecord),
    ) -> Option<AccountRecord> {
        let mut guard = self.lock();
        let record = guard.get_mut(&platform)?.find_mut(id)?;
        apply(record);
        Some(record.clone())
    }
}

impl Default for AccountPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AccountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        let counts: HashMap<&Platform, usize> =
            guard.iter().map(|(k, v)| (k, v.records.len())).collect();
        f.debug_struct("AccountPool")
            .field("accounts", &counts)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}
