//! Per-platform request decoration and success predicates.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ClientError;
use crate::signing::Platform;

/// How a platform reports success inside a 2xx JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPredicate {
	/// Any 2xx status.
	#[default]
	HttpOnly,
	/// `{"code": 0}`
	CodeZero,
	/// `{"success": true}`
	SuccessFlag,
	/// `{"status_code": 0}`
	StatusCodeZero,
	/// Body has no top-level `error` field.
	NoErrorField,
}

impl SuccessPredicate {
	pub fn evaluate(&self, status: u16, body: &[u8]) -> bool {
		if !(200..300).contains(&status) {
			return false;
		}
		if *self == SuccessPredicate::HttpOnly {
			return true;
		}
		let Ok(value) = serde_json::from_slice::<Value>(body) else {
			return false;
		};
		match self {
			SuccessPredicate::HttpOnly => true,
			SuccessPredicate::CodeZero => value.get("code").and_then(Value::as_i64) == Some(0),
			SuccessPredicate::SuccessFlag => value.get("success").and_then(Value::as_bool) == Some(true),
			SuccessPredicate::StatusCodeZero => {
				value.get("status_code").and_then(Value::as_i64) == Some(0)
			}
			SuccessPredicate::NoErrorField => value.get("error").is_none_or(Value::is_null),
		}
	}
}

/// Headers added to every request for a platform plus its success check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
	pub platform: Platform,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	#[serde(default)]
	pub success: SuccessPredicate,
}

impl PlatformProfile {
	pub fn new(platform: Platform, success: SuccessPredicate) -> Self {
		Self {
			platform,
			headers: BTreeMap::new(),
			success,
		}
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	/// Built-in profile for a platform.
	pub fn for_platform(platform: Platform) -> Self {
		match platform {
			Platform::Xhs => Self::new(platform, SuccessPredicate::SuccessFlag)
				.with_header("origin", "https://www.xiaohongshu.com")
				.with_header("referer", "https://www.xiaohongshu.com/"),
			Platform::Bilibili => Self::new(platform, SuccessPredicate::CodeZero)
				.with_header("origin", "https://www.bilibili.com")
				.with_header("referer", "https://www.bilibili.com/"),
			Platform::Douyin => Self::new(platform, SuccessPredicate::StatusCodeZero)
				.with_header("origin", "https://www.douyin.com")
				.with_header("referer", "https://www.douyin.com/"),
			Platform::Zhihu => Self::new(platform, SuccessPredicate::NoErrorField)
				.with_header("origin", "https://www.zhihu.com")
				.with_header("referer", "https://www.zhihu.com/"),
		}
	}

	/// Add the profile headers that `headers` does not already carry.
	pub fn decorate(&self, headers: &mut HeaderMap) -> Result<(), ClientError> {
		for (name, value) in &self.headers {
			let name = HeaderName::from_bytes(name.as_bytes())
				.map_err(|err| ClientError::InvalidHeader(format!("{name}: {err}")))?;
			if headers.contains_key(&name) {
				continue;
			}
			let value = HeaderValue::from_str(value)
				.map_err(|err| ClientError::InvalidHeader(format!("{name}: {err}")))?;
			headers.insert(name, value);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn predicates_read_platform_envelopes() {
		assert!(SuccessPredicate::CodeZero.evaluate(200, br#"{"code":0,"data":{}}"#));
		assert!(!SuccessPredicate::CodeZero.evaluate(200, br#"{"code":-412}"#));
		assert!(SuccessPredicate::SuccessFlag.evaluate(200, br#"{"success":true}"#));
		assert!(!SuccessPredicate::SuccessFlag.evaluate(200, b"not json"));
		assert!(SuccessPredicate::StatusCodeZero.evaluate(200, br#"{"status_code":0}"#));
		assert!(SuccessPredicate::NoErrorField.evaluate(200, br#"{"data":[]}"#));
		assert!(!SuccessPredicate::NoErrorField.evaluate(200, br#"{"error":{"code":40362}}"#));
		assert!(SuccessPredicate::HttpOnly.evaluate(204, b""));
		assert!(!SuccessPredicate::CodeZero.evaluate(500, br#"{"code":0}"#));
	}

	#[test]
	fn decorate_keeps_explicit_headers() {
		let profile = PlatformProfile::for_platform(Platform::Bilibili);
		let mut headers = HeaderMap::new();
		headers.insert("referer", HeaderValue::from_static("https://space.bilibili.com/"));
		profile.decorate(&mut headers).unwrap();
		assert_eq!(headers["referer"], "https://space.bilibili.com/");
		assert_eq!(headers["origin"], "https://www.bilibili.com");
	}

	#[test]
	fn profiles_deserialize_from_config() {
		let profile: PlatformProfile = serde_json::from_str(
			r#"{"platform":"zhihu","headers":{"x-app":"web"},"success":"no_error_field"}"#,
		)
		.unwrap();
		assert_eq!(profile.success, SuccessPredicate::NoErrorField);
		assert_eq!(profile.headers["x-app"], "web");
	}
}
