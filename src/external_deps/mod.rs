//! Integrations that rely on third-party runtimes.
//!
//! Currently this is the embedded JavaScript interpreter used to execute the
//! platforms' own signing scripts.

pub mod interpreters;

pub use interpreters::{BoaScriptVm, InterpreterError, InterpreterResult, ScriptVm};
