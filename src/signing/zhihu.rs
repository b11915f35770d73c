//! Zhihu `x-zse-96` / `x-zst-81` signing through the platform script.

use super::js_vm::JsVmSigner;
use super::{ZhihuSignRequest, ZhihuSignResult};

pub struct ZhihuSigner {
    vm: JsVmSigner,
}

impl ZhihuSigner {
    pub const SIGN_FUNCTION: &'static str = "get_sign";

    pub fn new(vm: JsVmSigner) -> Self {
        Self { vm }
    }

    pub async fn sign(&self, request: &ZhihuSignRequest) -> ZhihuSignResult {
        let raw = self
            .vm
            .call_or_empty(
                Self::SIGN_FUNCTION,
                vec![request.uri.clone(), request.cookies.clone()],
            )
            .await;

        // Empty output (degraded call) parses to the all-empty default.
        serde_json::from_str::<ZhihuSignResult>(&raw).unwrap_or_else(|_| {
            if !raw.is_empty() {
                log::warn!("zhihu script returned unexpected payload");
            }
            ZhihuSignResult::default()
        })
    }
}
