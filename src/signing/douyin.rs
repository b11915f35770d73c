//! Douyin `a-bogus` signing through the platform script.

use url::Url;

use super::js_vm::JsVmSigner;
use super::{DouyinSignRequest, DouyinSignResult};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

pub struct DouyinSigner {
    vm: JsVmSigner,
}

impl DouyinSigner {
    pub const DETAIL_FUNCTION: &'static str = "sign_datail";
    pub const REPLY_FUNCTION: &'static str = "sign_reply";

    pub fn new(vm: JsVmSigner) -> Self {
        Self { vm }
    }

    pub async fn sign(&self, request: &DouyinSignRequest) -> DouyinSignResult {
        let query = request
            .query_params
            .clone()
            .unwrap_or_else(|| query_from_uri(&request.uri));
        let user_agent = request
            .user_agent
            .clone()
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let function = if request.uri.contains("/reply") {
            Self::REPLY_FUNCTION
        } else {
            Self::DETAIL_FUNCTION
        };

        let mut args = vec![query];
        if let Some(body) = request.body.as_ref() {
            args.push(body.clone());
        }
        args.push(user_agent);

        DouyinSignResult {
            a_bogus: self.vm.call_or_empty(function, args).await,
        }
    }
}

/// The query component of a relative or absolute URI.
fn query_from_uri(uri: &str) -> String {
    if let Ok(url) = Url::parse(uri) {
        return url.query().unwrap_or_default().to_string();
    }
    uri.split_once('?')
        .map(|(_, query)| query.to_string())
        .unwrap_or_default()
}
