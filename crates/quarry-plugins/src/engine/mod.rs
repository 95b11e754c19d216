//! Interpretation engine abstraction.
//!
//! The loader never interprets plugin source itself. An
//! [`InterpretationEngine`] opens an [`EngineSession`] rooted at the shared
//! resolution root, the session evaluates the plugin's entry file, and the
//! resulting runtime value is exposed as a [`PluginObject`] whose method
//! table the contract verifier inspects.

#[cfg(feature = "rhai")]
pub mod rhai;

#[cfg(feature = "rhai")]
pub use self::rhai::RhaiEngine;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::PluginResult;

/// A shared, read-only runtime value produced by evaluating a plugin.
pub type PluginValue = Arc<dyn PluginObject>;

/// A callable member of a plugin value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name.
    pub name: String,
    /// Number of parameters, when the engine can tell.
    pub arity: Option<usize>,
}

impl Method {
    /// A method with a known arity.
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity: Some(arity),
        }
    }

    /// A method whose arity the engine cannot report.
    pub fn variadic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arity {
            Some(arity) => write!(f, "{}/{arity}", self.name),
            None => write!(f, "{}/*", self.name),
        }
    }
}

/// Runtime view of an evaluated plugin value.
pub trait PluginObject: Send + Sync + fmt::Debug {
    /// Engine-specific type name, used in diagnostics.
    fn type_name(&self) -> &str;

    /// The value's method table.
    fn methods(&self) -> Vec<Method>;

    /// Call `method` with JSON-encoded arguments.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Invocation`](crate::PluginError::Invocation)
    /// when the method is missing or fails at runtime.
    fn invoke(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> PluginResult<serde_json::Value>;
}

/// A language runtime that can evaluate plugin sources.
pub trait InterpretationEngine: Send + Sync {
    /// Open a fresh evaluation session.
    ///
    /// Imports made by the plugin resolve against `resolution_root`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Evaluation`](crate::PluginError::Evaluation)
    /// if the engine cannot be initialised.
    fn session(&self, resolution_root: &Path) -> PluginResult<Box<dyn EngineSession>>;
}

/// A single evaluation context.
pub trait EngineSession {
    /// Evaluate a source file, returning the last value it produced.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Evaluation`](crate::PluginError::Evaluation) on
    /// parse or runtime failure.
    fn evaluate_path(&mut self, path: &Path) -> PluginResult<PluginValue>;

    /// Resolve a named symbol defined by previously evaluated source.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Evaluation`](crate::PluginError::Evaluation)
    /// if the symbol is undefined or fails to evaluate.
    fn evaluate_symbol(&mut self, name: &str) -> PluginResult<PluginValue>;
}
