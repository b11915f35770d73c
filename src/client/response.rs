//! Normalized response returned by the client runtime.

use std::time::Duration;

use bytes::Bytes;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use super::{ClientError, ClientResult, SuccessPredicate};

#[derive(Debug, Clone)]
pub struct ApiResponse {
	status: u16,
	headers: HeaderMap,
	body: Bytes,
	url: Url,
	successful: bool,
	correlation_id: Uuid,
	attempts: u32,
	elapsed: Duration,
}

impl ApiResponse {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		status: u16,
		headers: HeaderMap,
		body: Bytes,
		url: Url,
		predicate: SuccessPredicate,
		correlation_id: Uuid,
		attempts: u32,
		elapsed: Duration,
	) -> Self {
		let successful = predicate.evaluate(status, &body);
		Self {
			status,
			headers,
			body,
			url,
			successful,
			correlation_id,
			attempts,
			elapsed,
		}
	}

	/// Raw HTTP status.
	pub fn status(&self) -> u16 {
		self.status
	}

	/// Raw response headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	pub fn url(&self) -> &Url {
		&self.url
	}

	pub fn body(&self) -> &Bytes {
		&self.body
	}

	/// Lossy UTF-8 view of the body.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
		serde_json::from_slice(&self.body).map_err(|err| ClientError::Decode(err.to_string()))
	}

	/// Platform-level success: a 2xx status and the platform's body check.
	pub fn is_successful(&self) -> bool {
		self.successful
	}

	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn elapsed(&self) -> Duration {
		self.elapsed
	}
}
