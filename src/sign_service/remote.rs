//! HTTP client for a remote sign server.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::SignService;
use super::wire::{PONG_PATH, SIGN_PATH_PREFIX, SignEnvelope};
use crate::signing::{
    BilibiliSignRequest, BilibiliSignResult, DouyinSignRequest, DouyinSignResult, Platform,
    SignError, SignResult, XhsSignRequest, XhsSignResult, ZhihuSignRequest, ZhihuSignResult,
};

pub struct RemoteSignService {
    client: reqwest::Client,
    base: Url,
}

impl RemoteSignService {
    pub fn new(endpoint: &str) -> SignResult<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(10))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> SignResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SignError::Transport(err.to_string()))?;
        Self::from_client(endpoint, client)
    }

    /// `endpoint` may carry a path prefix (`http://gw/signer`); routes are
    /// resolved beneath it.
    pub fn from_client(endpoint: &str, client: reqwest::Client) -> SignResult<Self> {
        let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|err| SignError::InvalidRequest(format!("invalid endpoint {endpoint}: {err}")))?;
        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> SignResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|err| SignError::InvalidRequest(err.to_string()))
    }

    async fn post<Req, Res>(&self, platform: Platform, request: &Req) -> SignResult<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let url = self.url(&format!("{SIGN_PATH_PREFIX}/{platform}/sign"))?;
        log::debug!("-> POST {url}");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|err| SignError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| SignError::Transport(err.to_string()))?;

        let envelope: SignEnvelope<Res> = serde_json::from_slice(&body).map_err(|err| {
            SignError::Decode(format!("status {status}: {err}"))
        })?;
        envelope.into_result()
    }
}

#[async_trait]
impl SignService for RemoteSignService {
    async fn xhs_sign(&self, request: XhsSignRequest) -> SignResult<XhsSignResult> {
        self.post(Platform::Xhs, &request).await
    }

    async fn bilibili_sign(&self, request: BilibiliSignRequest) -> SignResult<BilibiliSignResult> {
        self.post(Platform::Bilibili, &request).await
    }

    async fn douyin_sign(&self, request: DouyinSignRequest) -> SignResult<DouyinSignResult> {
        self.post(Platform::Douyin, &request).await
    }

    async fn zhihu_sign(&self, request: ZhihuSignRequest) -> SignResult<ZhihuSignResult> {
        self.post(Platform::Zhihu, &request).await
    }

    async fn ping(&self) -> bool {
        let Ok(url) = self.url(PONG_PATH) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                log::warn!("sign service ping failed: {err}");
                false
            }
        }
    }
}
