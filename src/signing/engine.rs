//! In-process signing engine holding one signer per platform.

use std::sync::Arc;

use super::douyin::DouyinSigner;
use super::js_vm::{JsVmSigner, ScriptSource};
use super::wbi::{NavWbiKeySource, WbiKeyProvider, WbiSigner};
use super::xhs::{XhsClientProfile, XhsSigner};
use super::zhihu::ZhihuSigner;
use super::{
    BilibiliSignRequest, BilibiliSignResult, DouyinSignRequest, DouyinSignResult, Platform,
    XhsSignRequest, XhsSignResult, ZhihuSignRequest, ZhihuSignResult,
};
use crate::config::{SignServiceConfig, VmLimits};

pub struct SigningEngine {
    xhs: XhsSigner,
    wbi: WbiSigner,
    wbi_keys: WbiKeyProvider,
    douyin: DouyinSigner,
    zhihu: ZhihuSigner,
}

impl SigningEngine {
    pub fn builder() -> SigningEngineBuilder {
        SigningEngineBuilder::new()
    }

    /// Engine wired from configuration: scripts resolved from the script
    /// directory, WBI keys fetched from `nav` unless disabled.
    pub fn from_config(config: &SignServiceConfig) -> Self {
        let wbi_keys = if config.fetch_wbi_keys {
            let source = NavWbiKeySource::new(reqwest::Client::new())
                .with_nav_url(config.wbi_nav_url.clone());
            WbiKeyProvider::new(Arc::new(source))
        } else {
            WbiKeyProvider::offline()
        }
        .with_ttl(config.wbi_key_ttl());

        SigningEngineBuilder::new()
            .with_vm_limits(config.vm_limits.clone())
            .with_xhs_profile(config.xhs_profile.clone())
            .with_script(Platform::Xhs, ScriptSource::file(config.script_path(Platform::Xhs)))
            .with_script(
                Platform::Douyin,
                ScriptSource::file(config.script_path(Platform::Douyin)),
            )
            .with_script(Platform::Zhihu, ScriptSource::file(config.script_path(Platform::Zhihu)))
            .with_wbi_keys(wbi_keys)
            .build()
    }

    pub async fn sign_xhs(&self, request: &XhsSignRequest) -> XhsSignResult {
        self.xhs.sign(request).await
    }

    /// Sign with the current Unix time as `wts`.
    pub async fn sign_bilibili(&self, request: &BilibiliSignRequest) -> BilibiliSignResult {
        self.sign_bilibili_at(request, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn sign_bilibili_at(
        &self,
        request: &BilibiliSignRequest,
        wts: i64,
    ) -> BilibiliSignResult {
        let keys = self.wbi_keys.keys(&request.cookies).await;
        self.wbi.sign(&request.req_data, &keys, wts)
    }

    pub async fn sign_douyin(&self, request: &DouyinSignRequest) -> DouyinSignResult {
        self.douyin.sign(request).await
    }

    pub async fn sign_zhihu(&self, request: &ZhihuSignRequest) -> ZhihuSignResult {
        self.zhihu.sign(request).await
    }
}

pub struct SigningEngineBuilder {
    vm_limits: VmLimits,
    xhs_profile: XhsClientProfile,
    xhs: Option<JsVmSigner>,
    douyin: Option<JsVmSigner>,
    zhihu: Option<JsVmSigner>,
    wbi_keys: Option<WbiKeyProvider>,
}

impl SigningEngineBuilder {
    pub fn new() -> Self {
        Self {
            vm_limits: VmLimits::default(),
            xhs_profile: XhsClientProfile::default(),
            xhs: None,
            douyin: None,
            zhihu: None,
            wbi_keys: None,
        }
    }

    /// Applies to scripts registered after this call.
    pub fn with_vm_limits(mut self, limits: VmLimits) -> Self {
        self.vm_limits = limits;
        self
    }

    pub fn with_xhs_profile(mut self, profile: XhsClientProfile) -> Self {
        self.xhs_profile = profile;
        self
    }

    /// Register the script for a VM-backed platform. Bilibili is native and
    /// ignores this.
    pub fn with_script(mut self, platform: Platform, source: ScriptSource) -> Self {
        let vm = JsVmSigner::new(platform.as_str(), source, self.vm_limits.clone());
        match platform {
            Platform::Xhs => self.xhs = Some(vm),
            Platform::Douyin => self.douyin = Some(vm),
            Platform::Zhihu => self.zhihu = Some(vm),
            Platform::Bilibili => {}
        }
        self
    }

    pub fn with_vm(mut self, platform: Platform, vm: JsVmSigner) -> Self {
        match platform {
            Platform::Xhs => self.xhs = Some(vm),
            Platform::Douyin => self.douyin = Some(vm),
            Platform::Zhihu => self.zhihu = Some(vm),
            Platform::Bilibili => {}
        }
        self
    }

    pub fn with_wbi_keys(mut self, provider: WbiKeyProvider) -> Self {
        self.wbi_keys = Some(provider);
        self
    }

    /// Platforms without a script get an empty one; their signers degrade to
    /// empty signatures.
    pub fn build(self) -> SigningEngine {
        let limits = self.vm_limits;
        let missing = |platform: Platform| {
            JsVmSigner::new(platform.as_str(), ScriptSource::inline(""), limits.clone())
        };

        SigningEngine {
            xhs: XhsSigner::new(
                self.xhs.unwrap_or_else(|| missing(Platform::Xhs)),
                self.xhs_profile,
            ),
            wbi: WbiSigner::new(),
            wbi_keys: self.wbi_keys.unwrap_or_else(WbiKeyProvider::offline),
            douyin: DouyinSigner::new(self.douyin.unwrap_or_else(|| missing(Platform::Douyin))),
            zhihu: ZhihuSigner::new(self.zhihu.unwrap_or_else(|| missing(Platform::Zhihu))),
        }
    }
}

impl Default for SigningEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
