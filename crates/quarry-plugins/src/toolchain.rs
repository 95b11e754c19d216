//! External dependency toolchain.
//!
//! Dependency preparation runs three steps in the plugin directory:
//! reconcile the manifest, fetch dependencies, and vendor them into a local
//! subdirectory. The toolchain is opaque to the loader; it only reports
//! success and its combined output.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use quarry_config::ToolchainSection;
use tracing::debug;

/// A toolchain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolchainStep {
    /// Bring the dependency manifest in line with the sources.
    Reconcile,
    /// Download declared dependencies.
    Fetch,
    /// Materialise dependencies into the plugin's vendor directory.
    Vendor,
}

impl ToolchainStep {
    /// All steps, in the order they run.
    pub const ALL: [Self; 3] = [Self::Reconcile, Self::Fetch, Self::Vendor];

    /// Lowercase step name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Fetch => "fetch",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for ToolchainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a toolchain step that could be started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainOutput {
    /// Whether the step exited successfully.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ToolchainOutput {
    /// A successful step with the given output.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// A failed step with the given output.
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs dependency toolchain steps.
pub trait DependencyToolchain: Send + Sync {
    /// Run `step` with `working_dir` as the current directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the toolchain could not be started at all.
    /// A toolchain that ran and failed returns `Ok` with `success == false`.
    fn run(&self, step: ToolchainStep, working_dir: &Path) -> io::Result<ToolchainOutput>;
}

/// A toolchain backed by an external program.
///
/// The default runs `cargo generate-lockfile`, `cargo fetch` and
/// `cargo vendor`. That vendors Rust crates, which the rhai engine cannot
/// import; script plugins with dependencies need a program that places
/// `.rhai` modules under `<plugin>/vendor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToolchain {
    program: String,
    reconcile: Vec<String>,
    fetch: Vec<String>,
    vendor: Vec<String>,
}

impl Default for CommandToolchain {
    fn default() -> Self {
        Self::from_section(&ToolchainSection::default())
    }
}

impl CommandToolchain {
    /// Use `program` with the default per-step arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Build from the `[toolchain]` configuration section.
    #[must_use]
    pub fn from_section(section: &ToolchainSection) -> Self {
        Self {
            program: section.program.clone(),
            reconcile: section.reconcile.clone(),
            fetch: section.fetch.clone(),
            vendor: section.vendor.clone(),
        }
    }

    /// Replace the arguments passed for `step`.
    #[must_use]
    pub fn with_step_args<I, S>(mut self, step: ToolchainStep, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect();
        match step {
            ToolchainStep::Reconcile => self.reconcile = args,
            ToolchainStep::Fetch => self.fetch = args,
            ToolchainStep::Vendor => self.vendor = args,
        }
        self
    }

    /// The program that is run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed for `step`.
    #[must_use]
    pub fn args(&self, step: ToolchainStep) -> &[String] {
        match step {
            ToolchainStep::Reconcile => &self.reconcile,
            ToolchainStep::Fetch => &self.fetch,
            ToolchainStep::Vendor => &self.vendor,
        }
    }
}

impl DependencyToolchain for CommandToolchain {
    fn run(&self, step: ToolchainStep, working_dir: &Path) -> io::Result<ToolchainOutput> {
        let program = which::which(&self.program).map_err(|e| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("toolchain program '{}' not found: {e}", self.program),
            )
        })?;

        debug!(
            program = %program.display(),
            step = %step,
            dir = %working_dir.display(),
            "running toolchain step"
        );

        let output = Command::new(&program)
            .args(self.args(step))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ToolchainOutput {
            success: output.status.success(),
            output: combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config() {
        let toolchain = CommandToolchain::default();
        assert_eq!(toolchain.program(), "cargo");
        assert_eq!(toolchain.args(ToolchainStep::Reconcile), ["generate-lockfile"]);
        assert_eq!(toolchain.args(ToolchainStep::Fetch), ["fetch"]);
        assert_eq!(toolchain.args(ToolchainStep::Vendor), ["vendor"]);
    }

    #[test]
    fn test_step_args_override() {
        let toolchain = CommandToolchain::new("deps").with_step_args(ToolchainStep::Vendor, [
            "vendor",
            "--offline",
        ]);
        assert_eq!(toolchain.args(ToolchainStep::Vendor), ["vendor", "--offline"]);
        assert_eq!(toolchain.args(ToolchainStep::Fetch), ["fetch"]);
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = CommandToolchain::new("quarry-no-such-toolchain-binary");
        let err = toolchain.run(ToolchainStep::Fetch, dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_combined() {
        if which::which("sh").is_err() {
            eprintln!("Skipping: sh not found on PATH");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let toolchain = CommandToolchain::new("sh").with_step_args(ToolchainStep::Fetch, [
            "-c",
            "echo fetched; echo broken >&2; exit 3",
        ]);

        let out = toolchain.run(ToolchainStep::Fetch, dir.path()).unwrap();
        assert!(!out.success);
        assert!(out.output.contains("fetched"));
        assert!(out.output.contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_in_working_dir() {
        if which::which("sh").is_err() {
            eprintln!("Skipping: sh not found on PATH");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let toolchain = CommandToolchain::new("sh")
            .with_step_args(ToolchainStep::Vendor, ["-c", "mkdir vendor"]);

        let out = toolchain.run(ToolchainStep::Vendor, dir.path()).unwrap();
        assert!(out.success);
        assert!(dir.path().join("vendor").is_dir());
    }
}
