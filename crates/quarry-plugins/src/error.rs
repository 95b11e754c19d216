//! Plugin loading error types.

use std::path::PathBuf;

/// Errors from the plugin loading pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A filesystem operation failed while hashing, discovering or copying.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed when the failure occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The dependency toolchain failed, or could not be started.
    #[error("dependency {step} failed in {dir}: {output}")]
    Dependency {
        /// Toolchain step that failed (`reconcile`, `fetch`, `vendor`, ...).
        step: String,
        /// Directory the step ran in.
        dir: PathBuf,
        /// Combined toolchain output, verbatim.
        output: String,
    },

    /// The interpretation engine could not evaluate the plugin.
    #[error("evaluation of {plugin} failed: {message}")]
    Evaluation {
        /// Entry file that was being evaluated.
        plugin: PathBuf,
        /// Engine diagnostic.
        message: String,
    },

    /// The evaluated value does not satisfy the requested contract.
    #[error("plugin {plugin} does not satisfy contract {contract}: {message}")]
    ContractVerify {
        /// Contract name.
        contract: String,
        /// Plugin root that was checked.
        plugin: PathBuf,
        /// Every missing or mismatched capability.
        message: String,
    },

    /// A plugin info file could not be read or parsed.
    #[error("manifest error in {path}: {message}")]
    Manifest {
        /// Path to the info file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// Calling a method on a loaded plugin failed at runtime.
    #[error("call to {method} on {type_name} failed: {message}")]
    Invocation {
        /// Runtime type name of the plugin value.
        type_name: String,
        /// Method that was invoked.
        method: String,
        /// Failure reason.
        message: String,
    },
}

impl PluginError {
    /// Build an [`PluginError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a contract mismatch rather than a fatal load failure.
    ///
    /// Batch loads turn mismatches into empty slots and abort on everything
    /// else.
    #[must_use]
    pub fn is_contract_mismatch(&self) -> bool {
        matches!(self, Self::ContractVerify { .. })
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
