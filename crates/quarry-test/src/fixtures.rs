//! Filesystem fixtures and test logging.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use quarry_plugins::{
    DependencyToolchain, InterpretationEngine, LoaderOptions, PluginLoader,
};
use quarry_telemetry::{LogConfig, LogTarget, setup_logging};

/// Marker file written by [`write_plugin`].
pub const TEST_MARKER: &str = "Cargo.toml";

/// Entry file written by [`write_plugin`].
pub const TEST_ENTRY: &str = "main.rhai";

/// A temporary workspace with a `plugins/` tree and a `deps/` resolution
/// root.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        Self { dir }
    }

    /// Workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory plugins are written under.
    #[must_use]
    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// Resolution root handed to the loader.
    #[must_use]
    pub fn resolution_root(&self) -> PathBuf {
        self.dir.path().join("deps")
    }

    /// Write a plugin at `plugins/<relative>` whose entry file holds
    /// `entry_source`.
    #[must_use]
    pub fn add_plugin(&self, relative: impl AsRef<Path>, entry_source: &str) -> PathBuf {
        write_plugin(&self.plugins_dir().join(relative), entry_source)
    }

    /// Loader options pointing at this workspace's resolution root.
    #[must_use]
    pub fn options(&self) -> LoaderOptions {
        LoaderOptions::new(self.resolution_root())
    }

    /// A loader over this workspace with the given collaborators.
    #[must_use]
    pub fn loader(
        &self,
        engine: Arc<dyn InterpretationEngine>,
        toolchain: Arc<dyn DependencyToolchain>,
    ) -> PluginLoader {
        PluginLoader::new(engine, toolchain, self.options())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a plugin root at `root` with a marker file and an entry file.
///
/// Returns `root`.
///
/// # Panics
///
/// Panics if the files cannot be written.
#[allow(clippy::expect_used)]
pub fn write_plugin(root: &Path, entry_source: &str) -> PathBuf {
    std::fs::create_dir_all(root).expect("failed to create plugin dir");
    let name = root
        .file_name()
        .map_or_else(|| "plugin".to_owned(), |n| n.to_string_lossy().into_owned());
    std::fs::write(
        root.join(TEST_MARKER),
        format!("[package]\nname = \"{name}\"\nversion = \"0.1.0\"\n"),
    )
    .expect("failed to write marker");
    std::fs::write(root.join(TEST_ENTRY), entry_source).expect("failed to write entry");
    root.to_path_buf()
}

/// Write `contents` to `root/<relative>`, creating parent directories.
///
/// # Panics
///
/// Panics if the file cannot be written.
#[allow(clippy::expect_used)]
pub fn write_file(root: &Path, relative: impl AsRef<Path>, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    std::fs::write(path, contents).expect("failed to write file");
}

/// Route `tracing` output through libtest's captured output, once per test
/// binary.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let config = LogConfig::new("debug")
            .with_target(LogTarget::Test)
            .without_ansi();
        // Another subscriber may already be installed by the test binary.
        let _ = setup_logging(&config);
    });
}
