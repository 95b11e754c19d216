//! Plugin locations and the optional `plugin.toml` info file.
//!
//! A plugin root may carry an info file naming its entry file and entry
//! symbol:
//!
//! ```toml
//! entry = "main.rhai"
//! symbol = "plugin"
//! ```
//!
//! Both keys are optional. Missing keys fall back to the loader's
//! [`LocationDefaults`].

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// How the plugin value is obtained after its entry file is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntryPoint {
    /// The last value the entry file evaluates to.
    #[default]
    LastValue,
    /// A named symbol defined by the entry file.
    Symbol(String),
}

impl EntryPoint {
    /// `Symbol(name)` when a name is given, `LastValue` otherwise.
    #[must_use]
    pub fn from_symbol(symbol: Option<String>) -> Self {
        symbol.map_or(Self::LastValue, Self::Symbol)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LastValue => f.write_str("<last value>"),
            Self::Symbol(name) => f.write_str(name),
        }
    }
}

/// A plugin on disk: its root directory, entry file, and entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLocation {
    root: PathBuf,
    entry_file: PathBuf,
    entry: EntryPoint,
}

impl PluginLocation {
    /// Create a location. A relative `entry_file` is taken relative to
    /// `root`.
    pub fn new(root: impl Into<PathBuf>, entry_file: impl AsRef<Path>, entry: EntryPoint) -> Self {
        let root = root.into();
        let entry_file = root.join(entry_file);
        Self {
            root,
            entry_file,
            entry,
        }
    }

    /// Build a location for `root`, reading its info file if present.
    ///
    /// # Errors
    ///
    /// - [`PluginError::Io`] if the info file exists but cannot be read.
    /// - [`PluginError::Manifest`] if it is malformed or names an entry file
    ///   outside the plugin root.
    pub fn from_root(root: impl Into<PathBuf>, defaults: &LocationDefaults) -> PluginResult<Self> {
        let root = root.into();
        let info_path = root.join(&defaults.info_file);

        let info = match std::fs::read_to_string(&info_path) {
            Ok(content) => {
                toml::from_str::<PluginInfo>(&content).map_err(|e| PluginError::Manifest {
                    path: info_path.clone(),
                    message: e.to_string(),
                })?
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(root = %root.display(), "no plugin info file, using defaults");
                PluginInfo::default()
            },
            Err(e) => return Err(PluginError::io(&info_path, e)),
        };

        let entry_file = info
            .entry
            .map_or_else(|| defaults.entry_file.clone(), PathBuf::from);
        if !is_contained(&entry_file) {
            return Err(PluginError::Manifest {
                path: info_path,
                message: format!(
                    "entry '{}' must be a relative path inside the plugin root",
                    entry_file.display()
                ),
            });
        }

        let entry = match info.symbol {
            Some(symbol) if symbol.is_empty() => {
                return Err(PluginError::Manifest {
                    path: info_path,
                    message: "symbol must not be empty".to_owned(),
                });
            },
            Some(symbol) => EntryPoint::Symbol(symbol),
            None => defaults.entry.clone(),
        };

        Ok(Self::new(root, entry_file, entry))
    }

    /// Plugin root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute (or root-relative) path of the entry file.
    #[must_use]
    pub fn entry_file(&self) -> &Path {
        &self.entry_file
    }

    /// Entry point convention.
    #[must_use]
    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }
}

impl fmt::Display for PluginLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// Fallbacks used when a plugin has no info file, or omits a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDefaults {
    /// Name of the per-plugin info file.
    pub info_file: String,
    /// Entry file relative to the plugin root.
    pub entry_file: PathBuf,
    /// Entry point convention.
    pub entry: EntryPoint,
}

impl Default for LocationDefaults {
    fn default() -> Self {
        Self {
            info_file: "plugin.toml".to_owned(),
            entry_file: PathBuf::from("main.rhai"),
            entry: EntryPoint::LastValue,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginInfo {
    entry: Option<String>,
    symbol: Option<String>,
}

fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
