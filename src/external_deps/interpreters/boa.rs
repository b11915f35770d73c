use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use boa_engine::{Context, Source};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::oneshot;

use super::{InterpreterError, InterpreterResult, ScriptVm};
use crate::config::VmLimits;

/// Minimal browser surface expected by platform signing scripts.
const BROWSER_PRELUDE: &str = r#"
var window = globalThis;
var self = globalThis;
var navigator = {
    userAgent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    platform: "MacIntel",
    language: "zh-CN",
    languages: ["zh-CN", "zh"],
    webdriver: false,
    cookieEnabled: true
};
var location = { href: "", hostname: "", protocol: "https:", pathname: "/", search: "" };
var __storage = {};
var localStorage = {
    getItem: function(key) { return Object.prototype.hasOwnProperty.call(__storage, key) ? __storage[key] : null; },
    setItem: function(key, value) { __storage[key] = String(value); },
    removeItem: function(key) { delete __storage[key]; }
};
var sessionStorage = localStorage;
var document = {
    cookie: "",
    referrer: "",
    location: location,
    createElement: function() { return { style: {}, setAttribute: function() {}, getContext: function() { return null; } }; },
    getElementById: function() { return null; },
    addEventListener: function() {}
};
window.navigator = navigator;
window.document = document;
window.location = location;
window.localStorage = localStorage;
function setTimeout(cb) { return 0; }
function clearTimeout() {}
function setInterval() { return 0; }
function clearInterval() {}
"#;

struct Job {
    function: String,
    args: Vec<String>,
    reply: oneshot::Sender<InterpreterResult<String>>,
}

/// Boa runtime owned by a dedicated thread.
///
/// `boa_engine::Context` is neither `Send` nor re-entrant, so the context lives
/// on one worker thread and calls are queued to it. The queue serialises every
/// invocation against this VM.
pub struct BoaScriptVm {
    name: String,
    jobs: mpsc::Sender<Job>,
    limits: VmLimits,
}

impl BoaScriptVm {
    /// Start the worker thread and evaluate `source` inside a fresh context.
    pub async fn spawn(
        name: impl Into<String>,
        source: String,
        limits: VmLimits,
    ) -> InterpreterResult<Self> {
        let name = name.into();
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker_limits = limits.clone();
        thread::Builder::new()
            .name(format!("jsvm-{name}"))
            .stack_size(limits.thread_stack_bytes)
            .spawn(move || run_worker(source, worker_limits, jobs_rx, ready_tx))
            .map_err(|err| InterpreterError::Other(err.to_string()))?;

        ready_rx
            .await
            .map_err(|_| InterpreterError::Load("vm thread exited during load".into()))??;

        log::info!("loaded script vm '{name}'");
        Ok(Self {
            name,
            jobs: jobs_tx,
            limits,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ScriptVm for BoaScriptVm {
    async fn call(&self, function: &str, args: Vec<String>) -> InterpreterResult<String> {
        let input_bytes: usize = args.iter().map(String::len).sum();
        if input_bytes > self.limits.max_input_bytes {
            return Err(InterpreterError::InputTooLarge(self.limits.max_input_bytes));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                function: function.to_string(),
                args,
                reply: reply_tx,
            })
            .map_err(|_| InterpreterError::Other(format!("vm '{}' is not running", self.name)))?;

        let timeout = Duration::from_millis(self.limits.execution_timeout_ms);
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(InterpreterError::Other(format!(
                "vm '{}' dropped the call",
                self.name
            ))),
            Err(_) => Err(InterpreterError::Timeout(self.limits.execution_timeout_ms)),
        }
    }
}

fn run_worker(
    source: String,
    limits: VmLimits,
    jobs: mpsc::Receiver<Job>,
    ready: oneshot::Sender<InterpreterResult<()>>,
) {
    let loaded = catch_unwind(AssertUnwindSafe(|| load_context(&source, &limits)))
        .unwrap_or_else(|_| Err(InterpreterError::Load("vm panicked while loading".into())));

    let mut context = match loaded {
        Ok(context) => {
            let _ = ready.send(Ok(()));
            context
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    while let Ok(job) = jobs.recv() {
        // Caller already gave up (timeout or cancellation).
        if job.reply.is_closed() {
            continue;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            invoke(&mut context, &job.function, &job.args)
        }))
        .unwrap_or_else(|_| Err(InterpreterError::Execution("vm panicked".into())));
        let _ = job.reply.send(outcome);
    }
}

fn load_context(source: &str, limits: &VmLimits) -> InterpreterResult<Context> {
    let mut context = Context::default();
    {
        let runtime_limits = context.runtime_limits_mut();
        runtime_limits.set_recursion_limit(limits.recursion_limit);
        runtime_limits.set_loop_iteration_limit(limits.loop_iteration_limit);
        runtime_limits.set_stack_size_limit(limits.stack_size_limit);
    }

    context
        .eval(Source::from_bytes(BROWSER_PRELUDE))
        .map_err(|err| InterpreterError::Load(err.to_string()))?;
    context
        .eval(Source::from_bytes(source))
        .map_err(|err| InterpreterError::Load(err.to_string()))?;
    Ok(context)
}

fn invoke(context: &mut Context, function: &str, args: &[String]) -> InterpreterResult<String> {
    static IDENT_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("static regex"));
    if !IDENT_RE.is_match(function) {
        return Err(InterpreterError::InvalidFunction(function.to_string()));
    }

    let encoded_args = args
        .iter()
        .map(|arg| serde_json::to_string(arg).map_err(|err| InterpreterError::Other(err.to_string())))
        .collect::<InterpreterResult<Vec<_>>>()?
        .join(", ");

    let script = format!(
        r#"(function() {{
    var __r = {function}({encoded_args});
    if (typeof __r === "string") return __r;
    if (__r === undefined || __r === null) return "";
    return JSON.stringify(__r);
}})()"#
    );

    let result = context
        .eval(Source::from_bytes(&script))
        .map_err(|err| InterpreterError::Execution(err.to_string()))?;

    result
        .to_string(context)
        .map_err(|err| InterpreterError::Execution(err.to_string()))?
        .to_std_string()
        .map_err(|_| InterpreterError::Other("unable to convert interpreter output".into()))
}
