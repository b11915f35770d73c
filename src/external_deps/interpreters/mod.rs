//! JavaScript interpreter infrastructure.
//!
//! Provides a shared trait and error type used by the script-based signers,
//! along with the concrete Boa runtime.

mod boa;

pub use boa::BoaScriptVm;

use async_trait::async_trait;
use thiserror::Error;

/// A loaded script whose global functions can be invoked by name.
///
/// Implementations own a single non-reentrant VM; calls are executed one at a
/// time in submission order.
#[async_trait]
pub trait ScriptVm: Send + Sync {
    /// Call the global function `function` with positional string arguments.
    /// Non-string return values are JSON-stringified.
    async fn call(&self, function: &str, args: Vec<String>) -> InterpreterResult<String>;
}

/// Failures produced by JavaScript runtimes.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to load script: {0}")]
    Load(String),
    #[error("javascript execution failed: {0}")]
    Execution(String),
    #[error("script call exceeded {0} ms")]
    Timeout(u64),
    #[error("script input exceeds {0} bytes")]
    InputTooLarge(usize),
    #[error("invalid function name '{0}'")]
    InvalidFunction(String),
    #[error("javascript engine error: {0}")]
    Other(String),
}

/// Convenience alias for runtime results.
pub type InterpreterResult<T> = Result<T, InterpreterError>;
