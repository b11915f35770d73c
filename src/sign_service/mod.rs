//! Uniform signing façade.
//!
//! [`SignService`] exposes one async method per platform. The local
//! implementation runs the [`SigningEngine`] in-process, the remote one talks to
//! a sign server speaking the `/signsrv/v1/{platform}/sign` protocol. Callers
//! hold an `Arc<dyn SignService>` and never know which one they got.

pub mod remote;
pub mod server;
pub mod wire;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{SignMode, SignServiceConfig};
use crate::signing::{
    BilibiliSignRequest, BilibiliSignResult, DouyinSignRequest, DouyinSignResult, SignResult,
    SigningEngine, XhsSignRequest, XhsSignResult, ZhihuSignRequest, ZhihuSignResult,
};

pub use remote::RemoteSignService;
pub use server::router;
pub use wire::SignEnvelope;

#[async_trait]
pub trait SignService: Send + Sync {
    async fn xhs_sign(&self, request: XhsSignRequest) -> SignResult<XhsSignResult>;

    async fn bilibili_sign(&self, request: BilibiliSignRequest) -> SignResult<BilibiliSignResult>;

    async fn douyin_sign(&self, request: DouyinSignRequest) -> SignResult<DouyinSignResult>;

    async fn zhihu_sign(&self, request: ZhihuSignRequest) -> SignResult<ZhihuSignResult>;

    /// Health probe. Never errors; unreachable services report `false`.
    async fn ping(&self) -> bool;
}

/// Signs in-process.
pub struct LocalSignService {
    engine: Arc<SigningEngine>,
}

impl LocalSignService {
    pub fn new(engine: Arc<SigningEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SigningEngine> {
        &self.engine
    }
}

#[async_trait]
impl SignService for LocalSignService {
    async fn xhs_sign(&self, request: XhsSignRequest) -> SignResult<XhsSignResult> {
        Ok(self.engine.sign_xhs(&request).await)
    }

    async fn bilibili_sign(&self, request: BilibiliSignRequest) -> SignResult<BilibiliSignResult> {
        Ok(self.engine.sign_bilibili(&request).await)
    }

    async fn douyin_sign(&self, request: DouyinSignRequest) -> SignResult<DouyinSignResult> {
        Ok(self.engine.sign_douyin(&request).await)
    }

    async fn zhihu_sign(&self, request: ZhihuSignRequest) -> SignResult<ZhihuSignResult> {
        Ok(self.engine.sign_zhihu(&request).await)
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Build the configured implementation.
pub fn from_config(config: &SignServiceConfig) -> SignResult<Arc<dyn SignService>> {
    Ok(match config.mode {
        SignMode::Local => Arc::new(LocalSignService::new(Arc::new(SigningEngine::from_config(
            config,
        )))),
        SignMode::Remote => Arc::new(RemoteSignService::with_timeout(
            &config.endpoint,
            config.request_timeout(),
        )?),
    })
}
