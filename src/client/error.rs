//! Error taxonomy of the client runtime.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::signing::Platform;
use crate::transport::{TransportError, TransportResponse};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("duplicate request {method} {url}")]
	Duplicate { method: String, url: String },
	#[error("no active {0} account available")]
	NoAccountAvailable(Platform),
	#[error("no proxy available")]
	NoProxyAvailable,
	#[error("request {correlation_id} cancelled")]
	Cancelled { correlation_id: Uuid },
	#[error(transparent)]
	Exhausted(Box<RequestFailure>),
	#[error("request body encode failed: {0}")]
	Encode(String),
	#[error("response decode failed: {0}")]
	Decode(String),
	#[error("invalid header: {0}")]
	InvalidHeader(String),
	#[error("invalid url: {0}")]
	InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
	/// Terminal failure details when retries were exhausted.
	pub fn failure(&self) -> Option<&RequestFailure> {
		match self {
			ClientError::Exhausted(failure) => Some(failure),
			_ => None,
		}
	}
}

/// Terminal failure of one logical call.
#[derive(Debug, Clone, Error)]
#[error("request {correlation_id} failed after {attempts} attempt(s) in {elapsed:?}: {last}")]
pub struct RequestFailure {
	pub correlation_id: Uuid,
	pub elapsed: Duration,
	pub attempts: u32,
	pub last: AttemptError,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
	#[error(transparent)]
	Transport(TransportError),
	#[error("timed out after {0:?}")]
	Timeout(Duration),
	#[error("http status {status}")]
	Status { status: u16, body: Bytes },
}

impl AttemptError {
	pub fn status(&self) -> Option<u16> {
		match self {
			AttemptError::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
	Success(TransportResponse),
	/// Worth retrying: network failures, timeouts, non-2xx statuses.
	Transient(AttemptError),
	/// Retrying cannot help, e.g. a request the transport refuses to build.
	Fatal(AttemptError),
}

impl AttemptOutcome {
	pub fn classify(result: Result<TransportResponse, TransportError>) -> Self {
		match result {
			Ok(response) if (200..300).contains(&response.status) => Self::Success(response),
			Ok(response) => Self::Transient(AttemptError::Status {
				status: response.status,
				body: response.body,
			}),
			Err(TransportError::Timeout(after)) => Self::Transient(AttemptError::Timeout(after)),
			Err(err @ TransportError::Invalid(_)) => Self::Fatal(AttemptError::Transport(err)),
			Err(err) => Self::Transient(AttemptError::Transport(err)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use http::HeaderMap;
	use url::Url;

	fn response(status: u16) -> TransportResponse {
		TransportResponse {
			status,
			headers: HeaderMap::new(),
			body: Bytes::from_static(b"{}"),
			url: Url::parse("https://example.com/").unwrap(),
		}
	}

	#[test]
	fn classifies_attempts() {
		assert!(matches!(AttemptOutcome::classify(Ok(response(200))), AttemptOutcome::Success(_)));
		assert!(matches!(
			AttemptOutcome::classify(Ok(response(503))),
			AttemptOutcome::Transient(AttemptError::Status { status: 503, .. })
		));
		assert!(matches!(
			AttemptOutcome::classify(Err(TransportError::Timeout(Duration::from_secs(1)))),
			AttemptOutcome::Transient(AttemptError::Timeout(_))
		));
		assert!(matches!(
			AttemptOutcome::classify(Err(TransportError::Connect("refused".into()))),
			AttemptOutcome::Transient(AttemptError::Transport(_))
		));
		assert!(matches!(
			AttemptOutcome::classify(Err(TransportError::Invalid("bad header".into()))),
			AttemptOutcome::Fatal(_)
		));
	}
}
