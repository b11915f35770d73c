//! Per-platform request signing.
//!
//! Native signers reproduce closed-form algorithms (Bilibili WBI, the XHS
//! `x-s-common` envelope) while the JS-VM signers execute the platform's own
//! obfuscated client script inside a sandboxed interpreter. Every signer
//! degrades to an empty signature instead of failing the caller.

pub mod douyin;
pub mod engine;
pub mod js_vm;
pub mod wbi;
pub mod xhs;
pub mod zhihu;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub use engine::{SigningEngine, SigningEngineBuilder};
pub use js_vm::{JsVmSigner, ScriptSource};
pub use wbi::{NavWbiKeySource, WbiKeyProvider, WbiKeySource, WbiKeys, WbiSigner};
pub use xhs::{XhsClientProfile, XhsSigner};

/// Platforms with a dedicated signing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Xhs,
    Bilibili,
    Douyin,
    Zhihu,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Xhs,
        Platform::Bilibili,
        Platform::Douyin,
        Platform::Zhihu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xhs => "xhs",
            Platform::Bilibili => "bilibili",
            Platform::Douyin => "douyin",
            Platform::Zhihu => "zhihu",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SignError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xhs" | "xiaohongshu" => Ok(Platform::Xhs),
            "bilibili" | "bili" => Ok(Platform::Bilibili),
            "douyin" | "dy" => Ok(Platform::Douyin),
            "zhihu" => Ok(Platform::Zhihu),
            other => Err(SignError::InvalidRequest(format!("unknown platform '{other}'"))),
        }
    }
}

/// Failures surfaced by the sign service façade.
///
/// Local signers absorb VM and key-fetch failures, so in-process signing only
/// produces `InvalidRequest`. The remaining variants come from the remote path.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid sign request: {0}")]
    InvalidRequest(String),
    #[error("sign service transport error: {0}")]
    Transport(String),
    #[error("sign service returned code {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("failed to decode sign service payload: {0}")]
    Decode(String),
}

pub type SignResult<T> = Result<T, SignError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XhsSignRequest {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub cookies: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XhsSignResult {
    #[serde(rename = "x-s")]
    pub x_s: String,
    #[serde(rename = "x-t")]
    pub x_t: String,
    #[serde(rename = "x-s-common")]
    pub x_s_common: String,
    #[serde(rename = "x-b3-traceid")]
    pub x_b3_traceid: String,
}

impl XhsSignResult {
    pub fn apply_headers(&self, headers: &mut HeaderMap) -> SignResult<()> {
        insert_header(headers, "x-s", &self.x_s)?;
        insert_header(headers, "x-t", &self.x_t)?;
        insert_header(headers, "x-s-common", &self.x_s_common)?;
        insert_header(headers, "x-b3-traceid", &self.x_b3_traceid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BilibiliSignRequest {
    #[serde(deserialize_with = "stringified_map")]
    pub req_data: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilibiliSignResult {
    pub wts: String,
    pub w_rid: String,
}

impl BilibiliSignResult {
    /// Append `wts` and `w_rid` to an outgoing parameter map.
    pub fn apply_params(&self, params: &mut BTreeMap<String, String>) {
        params.insert("wts".into(), self.wts.clone());
        params.insert("w_rid".into(), self.w_rid.clone());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DouyinSignRequest {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub cookies: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DouyinSignResult {
    #[serde(rename = "a-bogus")]
    pub a_bogus: String,
}

impl DouyinSignResult {
    /// Douyin carries the signature as the `a_bogus` query parameter.
    pub fn apply_query(&self, url: &mut url::Url) {
        if !self.a_bogus.is_empty() {
            url.query_pairs_mut().append_pair("a_bogus", &self.a_bogus);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZhihuSignRequest {
    pub uri: String,
    #[serde(default)]
    pub cookies: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZhihuSignResult {
    #[serde(rename = "x-zse-96")]
    pub x_zse_96: String,
    #[serde(rename = "x-zst-81")]
    pub x_zst_81: String,
}

impl ZhihuSignResult {
    pub fn apply_headers(&self, headers: &mut HeaderMap) -> SignResult<()> {
        insert_header(headers, "x-zse-93", "101_3_3.0")?;
        insert_header(headers, "x-zse-96", &self.x_zse_96)?;
        insert_header(headers, "x-zst-81", &self.x_zst_81)
    }
}

/// Look up a single cookie value in a `k=v; k2=v2` header string.
pub fn cookie_value<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then(|| value.trim())
    })
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> SignResult<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| SignError::InvalidRequest(format!("invalid value for header {name}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn stringified_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}
