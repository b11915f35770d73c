//! Lazily-loaded script VM shared by the script-based signers.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::VmLimits;
use crate::external_deps::interpreters::{
    BoaScriptVm, InterpreterError, InterpreterResult, ScriptVm,
};

/// Where a signer's script comes from.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Inline(Cow<'static, str>),
    File(PathBuf),
}

impl ScriptSource {
    pub fn inline(source: impl Into<Cow<'static, str>>) -> Self {
        ScriptSource::Inline(source.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ScriptSource::File(path.into())
    }

    async fn read(&self) -> InterpreterResult<String> {
        match self {
            ScriptSource::Inline(source) => Ok(source.to_string()),
            ScriptSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|err| {
                InterpreterError::Load(format!("{}: {err}", path.display()))
            }),
        }
    }
}

/// One VM per signer, loaded on first use and reused for the process
/// lifetime. Concurrent first calls race on the cell; exactly one load wins.
pub struct JsVmSigner {
    name: String,
    source: ScriptSource,
    limits: VmLimits,
    vm: OnceCell<Arc<dyn ScriptVm>>,
}

impl JsVmSigner {
    pub fn new(name: impl Into<String>, source: ScriptSource, limits: VmLimits) -> Self {
        Self {
            name: name.into(),
            source,
            limits,
            vm: OnceCell::new(),
        }
    }

    /// Use an already-running VM instead of loading `source`.
    pub fn with_vm(name: impl Into<String>, vm: Arc<dyn ScriptVm>) -> Self {
        Self {
            name: name.into(),
            source: ScriptSource::inline(""),
            limits: VmLimits::default(),
            vm: OnceCell::new_with(Some(vm)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn vm(&self) -> InterpreterResult<&Arc<dyn ScriptVm>> {
        self.vm
            .get_or_try_init(|| async {
                let source = self.source.read().await?;
                let vm = BoaScriptVm::spawn(self.name.clone(), source, self.limits.clone()).await?;
                Ok::<Arc<dyn ScriptVm>, InterpreterError>(Arc::new(vm))
            })
            .await
    }

    pub async fn call(&self, function: &str, args: Vec<String>) -> InterpreterResult<String> {
        self.vm().await?.call(function, args).await
    }

    /// Like [`call`](Self::call) but absorbs every failure into an empty string.
    pub async fn call_or_empty(&self, function: &str, args: Vec<String>) -> String {
        match self.call(function, args).await {
            Ok(output) => output,
            Err(err) => {
                log::warn!("{} signer degraded to empty signature: {err}", self.name);
                String::new()
            }
        }
    }
}
