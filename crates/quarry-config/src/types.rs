//! Configuration types for the quarry plugin loader.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so that a bare `[section]` header in TOML produces a
//! working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin layout and resolution settings.
    pub plugins: PluginsSection,
    /// External dependency toolchain invocation.
    pub toolchain: ToolchainSection,
    /// Interpretation engine limits.
    pub engine: EngineSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// PluginsSection
// ---------------------------------------------------------------------------

/// Where plugins live and how a plugin root is recognised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Shared directory that vendored dependencies are consolidated into.
    ///
    /// When unset, `~/.quarry/deps` is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_root: Option<PathBuf>,
    /// File whose presence marks a directory as a plugin root.
    pub manifest_marker: String,
    /// Optional per-plugin file naming the entry file and entry symbol.
    pub info_file: String,
    /// Entry file used when a plugin has no info file.
    pub entry_file: String,
    /// Entry symbol used when a plugin has no info file. Unset means the
    /// last value evaluated by the entry file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_symbol: Option<String>,
    /// Subdirectory the toolchain's vendor step materialises.
    pub vendor_dir: String,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            resolution_root: None,
            manifest_marker: "Cargo.toml".to_owned(),
            info_file: "plugin.toml".to_owned(),
            entry_file: "main.rhai".to_owned(),
            entry_symbol: None,
            vendor_dir: "vendor".to_owned(),
        }
    }
}

impl PluginsSection {
    /// The configured resolution root, or `<quarry_home>/deps`.
    #[must_use]
    pub fn resolution_root_or(&self, quarry_home: &Path) -> PathBuf {
        self.resolution_root
            .clone()
            .unwrap_or_else(|| quarry_home.join("deps"))
    }
}

// ---------------------------------------------------------------------------
// ToolchainSection
// ---------------------------------------------------------------------------

/// The program run to reconcile, fetch and vendor a plugin's dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSection {
    /// Program name or path (looked up on `PATH`).
    pub program: String,
    /// Arguments for the manifest reconcile step.
    pub reconcile: Vec<String>,
    /// Arguments for the fetch step.
    pub fetch: Vec<String>,
    /// Arguments for the vendor step.
    pub vendor: Vec<String>,
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            program: "cargo".to_owned(),
            reconcile: vec!["generate-lockfile".to_owned()],
            fetch: vec!["fetch".to_owned()],
            vendor: vec!["vendor".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSection
// ---------------------------------------------------------------------------

/// Interpretation engine limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Maximum number of operations a single evaluation may perform.
    /// `0` disables the limit.
    pub max_operations: u64,
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["quarry_plugins=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
