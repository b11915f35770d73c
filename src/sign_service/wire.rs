//! Sign-service wire envelope: `{code, message, data}` with `code == 0` on
//! success.

use serde::{Deserialize, Serialize};

use crate::signing::{SignError, SignResult};

pub const SIGN_PATH_PREFIX: &str = "/signsrv/v1";
pub const PONG_PATH: &str = "/signsrv/pong";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignEnvelope<T> {
    pub code: i64,
    pub message: String,
    pub data: Option<T>,
}

impl<T> SignEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".into(),
            data: Some(data),
        }
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn into_result(self) -> SignResult<T> {
        if self.code != 0 {
            return Err(SignError::Remote {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| SignError::Decode("success envelope without data".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::DouyinSignResult;

    #[test]
    fn unwraps_success() {
        let envelope: SignEnvelope<DouyinSignResult> = serde_json::from_str(
            r#"{"code":0,"message":"success","data":{"a-bogus":"xyz"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.into_result().unwrap().a_bogus, "xyz");
    }

    #[test]
    fn surfaces_remote_error_codes() {
        let envelope: SignEnvelope<DouyinSignResult> =
            serde_json::from_str(r#"{"code":500,"message":"vm crashed"}"#).unwrap();
        match envelope.into_result() {
            Err(SignError::Remote { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "vm crashed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
