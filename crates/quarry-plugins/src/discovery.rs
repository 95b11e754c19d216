//! Recursive discovery of plugin roots.
//!
//! A directory is a plugin root iff it directly contains the manifest marker
//! file. The walk descends into matched roots as well, so nested plugins are
//! reported alongside their parents.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{PluginError, PluginResult};

/// Find every plugin root under `root`, sorted by path.
///
/// `root` itself is included when it contains the marker. Symlinked
/// directories are not followed.
///
/// # Errors
///
/// Returns [`PluginError::Io`] if any part of the tree cannot be read.
pub fn find_plugin_roots(root: &Path, marker: &str) -> PluginResult<Vec<PathBuf>> {
    let mut roots = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            PluginError::io(path, e.into())
        })?;

        if entry.depth() == 0 || entry.file_name() != marker || !entry.file_type().is_file() {
            continue;
        }

        if let Some(parent) = entry.path().parent() {
            debug!(root = %parent.display(), "found plugin root");
            roots.push(parent.to_path_buf());
        }
    }

    roots.sort();
    roots.dedup();
    info!(
        search_root = %root.display(),
        marker,
        count = roots.len(),
        "discovered plugin roots"
    );
    Ok(roots)
}
