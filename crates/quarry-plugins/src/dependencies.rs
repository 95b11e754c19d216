//! Dependency preparation.
//!
//! Before a plugin is evaluated its dependencies are reconciled, fetched and
//! vendored by the [`DependencyToolchain`], and the vendored tree is merged
//! into `<resolution_root>/src` so the engine can resolve imports from one
//! place. Every step is fatal on failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{PluginError, PluginResult};
use crate::toolchain::{DependencyToolchain, ToolchainStep};

/// Runs the toolchain for a plugin and consolidates its vendored sources.
#[derive(Clone)]
pub struct DependencyPreparer {
    toolchain: Arc<dyn DependencyToolchain>,
    resolution_root: PathBuf,
    vendor_dir: String,
}

impl std::fmt::Debug for DependencyPreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyPreparer")
            .field("resolution_root", &self.resolution_root)
            .field("vendor_dir", &self.vendor_dir)
            .finish_non_exhaustive()
    }
}

impl DependencyPreparer {
    /// Create a preparer that vendors into `<plugin>/vendor`.
    pub fn new(toolchain: Arc<dyn DependencyToolchain>, resolution_root: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            resolution_root: resolution_root.into(),
            vendor_dir: "vendor".to_owned(),
        }
    }

    /// Change the name of the vendor subdirectory.
    #[must_use]
    pub fn with_vendor_dir(mut self, vendor_dir: impl Into<String>) -> Self {
        self.vendor_dir = vendor_dir.into();
        self
    }

    /// The shared resolution root.
    #[must_use]
    pub fn resolution_root(&self) -> &Path {
        &self.resolution_root
    }

    /// Directory vendored sources are merged into.
    #[must_use]
    pub fn source_root(&self) -> PathBuf {
        self.resolution_root.join("src")
    }

    /// Prepare the dependencies of the plugin at `plugin_dir`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::Io`] if the resolution root cannot be created or the
    ///   vendored tree cannot be copied.
    /// - [`PluginError::Dependency`] if a toolchain step fails or the
    ///   toolchain cannot be started.
    pub fn prepare(&self, plugin_dir: &Path) -> PluginResult<()> {
        std::fs::create_dir_all(&self.resolution_root)
            .map_err(|e| PluginError::io(&self.resolution_root, e))?;

        for step in ToolchainStep::ALL {
            self.run_step(step, plugin_dir)?;
        }

        let vendored = plugin_dir.join(&self.vendor_dir);
        if vendored.is_dir() {
            let target = self.source_root();
            copy_tree(&vendored, &target)?;
            info!(
                plugin = %plugin_dir.display(),
                target = %target.display(),
                "merged vendored dependencies"
            );
        } else {
            debug!(plugin = %plugin_dir.display(), "no vendored dependencies");
        }

        Ok(())
    }

    fn run_step(&self, step: ToolchainStep, plugin_dir: &Path) -> PluginResult<()> {
        let dependency_error = |output: String| PluginError::Dependency {
            step: step.to_string(),
            dir: plugin_dir.to_path_buf(),
            output,
        };

        let result = self
            .toolchain
            .run(step, plugin_dir)
            .map_err(|e| dependency_error(e.to_string()))?;

        if !result.success {
            return Err(dependency_error(result.output));
        }

        debug!(plugin = %plugin_dir.display(), step = %step, "toolchain step finished");
        Ok(())
    }
}

/// Recursively copy `src` into `dst`, overwriting existing files.
///
/// Symlinks are skipped.
fn copy_tree(src: &Path, dst: &Path) -> PluginResult<()> {
    std::fs::create_dir_all(dst).map_err(|e| PluginError::io(dst, e))?;

    for entry in std::fs::read_dir(src).map_err(|e| PluginError::io(src, e))? {
        let entry = entry.map_err(|e| PluginError::io(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| PluginError::io(&src_path, e))?;

        if file_type.is_symlink() {
            debug!(path = %src_path.display(), "skipping symlink in vendored tree");
        } else if file_type.is_dir() {
            copy_tree(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path).map_err(|e| PluginError::io(&src_path, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use super::*;
    use crate::toolchain::ToolchainOutput;

    /// Records steps and optionally fails one of them.
    #[derive(Default)]
    struct Scripted {
        steps: Mutex<Vec<ToolchainStep>>,
        fail_at: Option<ToolchainStep>,
        unreachable: bool,
    }

    impl DependencyToolchain for Scripted {
        fn run(&self, step: ToolchainStep, dir: &Path) -> io::Result<ToolchainOutput> {
            if self.unreachable {
                return Err(io::Error::new(io::ErrorKind::NotFound, "toolchain missing"));
            }
            self.steps.lock().unwrap().push(step);
            if self.fail_at == Some(step) {
                return Ok(ToolchainOutput::failure("resolver: version conflict\n"));
            }
            if step == ToolchainStep::Vendor {
                std::fs::create_dir_all(dir.join("vendor/strings")).unwrap();
                std::fs::write(dir.join("vendor/strings/lib.rhai"), "fn up(s) { s }").unwrap();
            }
            Ok(ToolchainOutput::success(""))
        }
    }

    #[test]
    fn test_steps_run_in_order_and_vendor_is_merged() {
        let root = tempfile::tempdir().unwrap();
        let plugin = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(Scripted::default());
        let resolution_root = root.path().join("deps");

        DependencyPreparer::new(Arc::clone(&toolchain) as Arc<dyn DependencyToolchain>, &resolution_root)
            .prepare(plugin.path())
            .unwrap();

        assert_eq!(*toolchain.steps.lock().unwrap(), ToolchainStep::ALL);
        assert_eq!(
            std::fs::read_to_string(resolution_root.join("src/strings/lib.rhai")).unwrap(),
            "fn up(s) { s }"
        );
    }

    #[test]
    fn test_failed_step_stops_preparation() {
        let root = tempfile::tempdir().unwrap();
        let plugin = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(Scripted {
            fail_at: Some(ToolchainStep::Fetch),
            ..Scripted::default()
        });

        let err = DependencyPreparer::new(Arc::clone(&toolchain) as Arc<dyn DependencyToolchain>, root.path())
            .prepare(plugin.path())
            .unwrap_err();

        match err {
            PluginError::Dependency { step, output, .. } => {
                assert_eq!(step, "fetch");
                assert_eq!(output, "resolver: version conflict\n");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*toolchain.steps.lock().unwrap(), [
            ToolchainStep::Reconcile,
            ToolchainStep::Fetch
        ]);
        assert!(!root.path().join("src").exists());
    }

    #[test]
    fn test_unreachable_toolchain_is_dependency_error() {
        let root = tempfile::tempdir().unwrap();
        let plugin = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(Scripted {
            unreachable: true,
            ..Scripted::default()
        });

        let err = DependencyPreparer::new(toolchain, root.path())
            .prepare(plugin.path())
            .unwrap_err();
        assert!(matches!(err, PluginError::Dependency { ref step, .. } if step == "reconcile"));
    }

    #[test]
    fn test_missing_vendor_dir_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let plugin = tempfile::tempdir().unwrap();

        struct Quiet;
        impl DependencyToolchain for Quiet {
            fn run(&self, _step: ToolchainStep, _dir: &Path) -> io::Result<ToolchainOutput> {
                Ok(ToolchainOutput::success(""))
            }
        }

        let resolution_root = root.path().join("nested/deps");
        DependencyPreparer::new(Arc::new(Quiet), &resolution_root)
            .prepare(plugin.path())
            .unwrap();
        assert!(resolution_root.is_dir());
        assert!(!resolution_root.join("src").exists());
    }

    #[test]
    fn test_custom_vendor_dir() {
        let root = tempfile::tempdir().unwrap();
        let plugin = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(plugin.path().join("third_party")).unwrap();
        std::fs::write(plugin.path().join("third_party/a.rhai"), "1").unwrap();

        struct Quiet;
        impl DependencyToolchain for Quiet {
            fn run(&self, _step: ToolchainStep, _dir: &Path) -> io::Result<ToolchainOutput> {
                Ok(ToolchainOutput::success(""))
            }
        }

        let preparer =
            DependencyPreparer::new(Arc::new(Quiet), root.path()).with_vendor_dir("third_party");
        preparer.prepare(plugin.path()).unwrap();
        assert!(preparer.source_root().join("a.rhai").is_file());
    }
}
