//! Bilibili WBI signing.
//!
//! `w_rid = md5(sorted_query + mixin_key)` where the mixin key is a fixed
//! permutation of the concatenated `img_key`/`sub_key` pair published by the
//! `nav` endpoint. Keys rotate daily, so they are cached with a TTL and fall
//! back to a last-known-good pair whenever fetching fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::BilibiliSignResult;

/// Positions into `img_key + sub_key`; only the first 32 are used.
const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

const FILTERED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

const FALLBACK_IMG_KEY: &str = "7cd084941338484aae1ad9425b84077c";
const FALLBACK_SUB_KEY: &str = "4932caff0ff746eab6f01bf08b70ac45";

pub const DEFAULT_NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
        }
    }

    /// Last-known-good pair used whenever the live keys are unavailable.
    pub fn fallback() -> Self {
        Self::new(FALLBACK_IMG_KEY, FALLBACK_SUB_KEY)
    }

    pub fn mixin_key(&self) -> String {
        mixin_key(&self.img_key, &self.sub_key)
    }
}

/// Derive the 32-character mixin key.
pub fn mixin_key(img_key: &str, sub_key: &str) -> String {
    let raw: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&index| raw.get(index))
        .take(32)
        .collect()
}

/// Pure, deterministic WBI signer. Performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct WbiSigner;

impl WbiSigner {
    pub fn new() -> Self {
        Self
    }

    /// Sign `params` with the supplied keys and timestamp, returning the full
    /// parameter set including `wts` and `w_rid`.
    pub fn sign_params(
        &self,
        params: &BTreeMap<String, String>,
        keys: &WbiKeys,
        wts: i64,
    ) -> BTreeMap<String, String> {
        let mut signed = params.clone();
        signed.insert("wts".into(), wts.to_string());

        let query = canonical_query(&signed);
        let digest = md5::compute(format!("{query}{}", keys.mixin_key()));
        signed.insert("w_rid".into(), format!("{digest:x}"));
        signed
    }

    pub fn sign(&self, params: &BTreeMap<String, String>, keys: &WbiKeys, wts: i64) -> BilibiliSignResult {
        let signed = self.sign_params(params, keys, wts);
        BilibiliSignResult {
            wts: wts.to_string(),
            w_rid: signed.get("w_rid").cloned().unwrap_or_default(),
        }
    }
}

/// Keys sorted ordinally (the `BTreeMap` order), values stripped of `!'()*`,
/// both sides percent-encoded.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| {
            let filtered: String = value.chars().filter(|c| !FILTERED_CHARS.contains(c)).collect();
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(&filtered))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Source of live WBI keys.
#[async_trait]
pub trait WbiKeySource: Send + Sync {
    async fn fetch(&self, cookies: &str) -> Result<WbiKeys, String>;
}

#[derive(Debug, Deserialize)]
struct NavEnvelope {
    data: Option<NavData>,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: Option<WbiImg>,
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

/// Reads keys from the `nav` endpoint's `wbi_img` urls.
pub struct NavWbiKeySource {
    client: reqwest::Client,
    nav_url: String,
}

impl NavWbiKeySource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            nav_url: DEFAULT_NAV_URL.to_string(),
        }
    }

    pub fn with_nav_url(mut self, url: impl Into<String>) -> Self {
        self.nav_url = url.into();
        self
    }
}

#[async_trait]
impl WbiKeySource for NavWbiKeySource {
    async fn fetch(&self, cookies: &str) -> Result<WbiKeys, String> {
        let mut request = self
            .client
            .get(&self.nav_url)
            .header(http::header::REFERER, "https://www.bilibili.com/");
        if !cookies.is_empty() {
            request = request.header(http::header::COOKIE, cookies);
        }

        let envelope: NavEnvelope = request
            .send()
            .await
            .map_err(|err| err.to_string())?
            .json()
            .await
            .map_err(|err| err.to_string())?;

        let img = envelope
            .data
            .and_then(|data| data.wbi_img)
            .ok_or_else(|| "nav response has no wbi_img".to_string())?;

        match (key_from_url(&img.img_url), key_from_url(&img.sub_url)) {
            (Some(img_key), Some(sub_key)) => Ok(WbiKeys::new(img_key, sub_key)),
            _ => Err(format!("unexpected wbi urls: {} / {}", img.img_url, img.sub_url)),
        }
    }
}

fn key_from_url(url: &str) -> Option<String> {
    static KEY_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"/([0-9A-Za-z]{32})\.[A-Za-z]+$").expect("static regex"));
    KEY_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

struct CachedKeys {
    keys: WbiKeys,
    fetched_at: Instant,
}

/// TTL cache in front of a [`WbiKeySource`]. Never fails.
pub struct WbiKeyProvider {
    source: Option<Arc<dyn WbiKeySource>>,
    ttl: Duration,
    cached: Mutex<Option<CachedKeys>>,
}

impl WbiKeyProvider {
    pub fn new(source: Arc<dyn WbiKeySource>) -> Self {
        Self {
            source: Some(source),
            ttl: DEFAULT_KEY_TTL,
            cached: Mutex::new(None),
        }
    }

    /// Provider that always serves the fallback pair.
    pub fn offline() -> Self {
        Self {
            source: None,
            ttl: DEFAULT_KEY_TTL,
            cached: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn keys(&self, cookies: &str) -> WbiKeys {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return cached.keys.clone();
        }

        let Some(source) = self.source.as_ref() else {
            return WbiKeys::fallback();
        };

        match source.fetch(cookies).await {
            Ok(keys) => {
                log::info!("refreshed bilibili wbi keys");
                *guard = Some(CachedKeys {
                    keys: keys.clone(),
                    fetched_at: Instant::now(),
                });
                keys
            }
            Err(err) => {
                log::warn!("wbi key fetch failed, using fallback keys: {err}");
                WbiKeys::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn derives_mixin_key_by_permutation() {
        let key = mixin_key(
            "0123456789abcdefghijklmnopqrstuv",
            "ABCDEFGHIJKLMNOPQRSTUVWXYZ012345",
        );
        assert_eq!(key, "OPi2V8nAfSav03NDrL5RB9KjtseHcGJd");
    }

    #[test]
    fn signing_is_deterministic() {
        let keys = WbiKeys::fallback();
        let params = BTreeMap::from([
            ("mid".to_string(), "2".to_string()),
            ("keyword".to_string(), "hello world".to_string()),
        ]);
        let first = WbiSigner::new().sign(&params, &keys, 1_702_204_169);
        let second = WbiSigner::new().sign(&params, &keys, 1_702_204_169);
        assert_eq!(first, second);
        assert_eq!(first.wts, "1702204169");
        assert_eq!(first.w_rid.len(), 32);
        assert!(first.w_rid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn w_rid_matches_manual_digest() {
        let keys = WbiKeys::new(
            "0123456789abcdefghijklmnopqrstuv",
            "ABCDEFGHIJKLMNOPQRSTUVWXYZ012345",
        );
        let params = BTreeMap::from([("foo".to_string(), "a b!(c)".to_string())]);
        let result = WbiSigner::new().sign(&params, &keys, 100);

        let expected = md5::compute("foo=a%20bc&wts=100OPi2V8nAfSav03NDrL5RB9KjtseHcGJd");
        assert_eq!(result.w_rid, format!("{expected:x}"));
    }

    #[test]
    fn extracts_key_from_wbi_url() {
        assert_eq!(
            key_from_url("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png")
                .as_deref(),
            Some("7cd084941338484aae1ad9425b84077c")
        );
        assert_eq!(key_from_url("https://i0.hdslb.com/bfs/wbi/short.png"), None);
    }

    struct FlakySource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WbiKeySource for FlakySource {
        async fn fetch(&self, _cookies: &str) -> Result<WbiKeys, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("network down".into())
            } else {
                Ok(WbiKeys::new("a".repeat(32), "b".repeat(32)))
            }
        }
    }

    #[tokio::test]
    async fn caches_keys_within_ttl() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let provider = WbiKeyProvider::new(source.clone());
        let first = provider.keys("").await;
        let second = provider.keys("").await;
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_when_fetch_fails() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let provider = WbiKeyProvider::new(source);
        assert_eq!(provider.keys("").await, WbiKeys::fallback());
    }
}
