//! Mock implementations for testing.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use quarry_plugins::{
    DependencyToolchain, EngineSession, InterpretationEngine, Method, PluginError, PluginObject,
    PluginResult, PluginValue, ToolchainOutput, ToolchainStep,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// StaticObject
// ---------------------------------------------------------------------------

/// A plugin value with a fixed method table and canned return values.
#[derive(Debug, Clone)]
pub struct StaticObject {
    type_name: String,
    methods: BTreeMap<String, (Option<usize>, Value)>,
}

impl StaticObject {
    /// Create an object with no methods.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Add a method that returns `result`.
    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, arity: usize, result: Value) -> Self {
        self.methods.insert(name.into(), (Some(arity), result));
        self
    }

    /// Add a method whose arity is unknown.
    #[must_use]
    pub fn with_variadic(mut self, name: impl Into<String>, result: Value) -> Self {
        self.methods.insert(name.into(), (None, result));
        self
    }

    /// Wrap into a shared plugin value.
    #[must_use]
    pub fn into_value(self) -> PluginValue {
        Arc::new(self)
    }
}

impl PluginObject for StaticObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn methods(&self) -> Vec<Method> {
        self.methods
            .iter()
            .map(|(name, (arity, _))| Method {
                name: name.clone(),
                arity: *arity,
            })
            .collect()
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> PluginResult<Value> {
        let error = |message: String| PluginError::Invocation {
            type_name: self.type_name.clone(),
            method: method.to_owned(),
            message,
        };

        let (arity, result) = self
            .methods
            .get(method)
            .ok_or_else(|| error("no such method".to_owned()))?;
        if arity.is_some_and(|n| n != args.len()) {
            return Err(error(format!(
                "expected {} arguments, got {}",
                arity.unwrap_or_default(),
                args.len()
            )));
        }
        Ok(result.clone())
    }
}

// ---------------------------------------------------------------------------
// MockEngine
// ---------------------------------------------------------------------------

/// Interpretation engine whose "source files" are JSON documents.
///
/// Evaluating a file parses it as JSON. A JSON object becomes a
/// [`StaticObject`] whose keys are methods returning the key's value; a key
/// written `name/N` declares arity `N` (default `0`). Symbol lookup selects a
/// key of the top-level object and wraps its value the same way.
///
/// Every call is counted, so tests can assert how often the loader
/// evaluated a plugin.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    sessions: Arc<AtomicUsize>,
    evaluations: Arc<AtomicUsize>,
    symbol_lookups: Arc<AtomicUsize>,
    roots: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockEngine {
    /// Create a new mock engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of entry files evaluated.
    #[must_use]
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Number of symbol lookups.
    #[must_use]
    pub fn symbol_lookup_count(&self) -> usize {
        self.symbol_lookups.load(Ordering::SeqCst)
    }

    /// Resolution roots sessions were opened with, in order.
    #[must_use]
    pub fn resolution_roots(&self) -> Vec<PathBuf> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InterpretationEngine for MockEngine {
    fn session(&self, resolution_root: &Path) -> PluginResult<Box<dyn EngineSession>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resolution_root.to_path_buf());
        Ok(Box::new(MockSession {
            engine: self.clone(),
            entry: PathBuf::new(),
            document: None,
        }))
    }
}

struct MockSession {
    engine: MockEngine,
    entry: PathBuf,
    document: Option<Value>,
}

impl MockSession {
    fn error(&self, message: impl Into<String>) -> PluginError {
        PluginError::Evaluation {
            plugin: self.entry.clone(),
            message: message.into(),
        }
    }
}

impl EngineSession for MockSession {
    fn evaluate_path(&mut self, path: &Path) -> PluginResult<PluginValue> {
        self.engine.evaluations.fetch_add(1, Ordering::SeqCst);
        self.entry = path.to_path_buf();

        let source = std::fs::read_to_string(path).map_err(|e| self.error(e.to_string()))?;
        let document: Value =
            serde_json::from_str(&source).map_err(|e| self.error(e.to_string()))?;
        let value = json_object(&document);
        self.document = Some(document);
        Ok(value)
    }

    fn evaluate_symbol(&mut self, name: &str) -> PluginResult<PluginValue> {
        self.engine.symbol_lookups.fetch_add(1, Ordering::SeqCst);

        let symbol = self
            .document
            .as_ref()
            .and_then(|doc| doc.get(name))
            .ok_or_else(|| self.error(format!("symbol `{name}` is not defined")))?;
        Ok(json_object(symbol))
    }
}

fn json_object(value: &Value) -> PluginValue {
    let Some(map) = value.as_object() else {
        return StaticObject::new(json_type_name(value)).into_value();
    };

    let mut object = StaticObject::new("object");
    for (key, result) in map {
        let (name, arity) = match key.rsplit_once('/') {
            Some((name, arity)) => match arity.parse() {
                Ok(n) => (name, n),
                Err(_) => (key.as_str(), 0),
            },
            None => (key.as_str(), 0),
        };
        object = object.with_method(name, arity, result.clone());
    }
    object.into_value()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// MockToolchain
// ---------------------------------------------------------------------------

/// A failure injected into [`MockToolchain`].
#[derive(Debug, Clone)]
struct InjectedFailure {
    dir: Option<PathBuf>,
    step: ToolchainStep,
    output: String,
}

/// Dependency toolchain that records its calls instead of running anything.
#[derive(Debug, Default)]
pub struct MockToolchain {
    calls: Mutex<Vec<(ToolchainStep, PathBuf)>>,
    failures: Mutex<Vec<InjectedFailure>>,
    vendored: Mutex<Vec<(PathBuf, String)>>,
    lockfile: Option<(PathBuf, String)>,
    unreachable: AtomicBool,
}

impl MockToolchain {
    /// Create a toolchain where every step succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `step` in every directory with `output`.
    #[must_use]
    pub fn failing_at(self, step: ToolchainStep, output: impl Into<String>) -> Self {
        self.push_failure(None, step, output.into());
        self
    }

    /// Fail `step` only when run in `dir`.
    #[must_use]
    pub fn failing_in(
        self,
        dir: impl Into<PathBuf>,
        step: ToolchainStep,
        output: impl Into<String>,
    ) -> Self {
        self.push_failure(Some(dir.into()), step, output.into());
        self
    }

    /// On the vendor step, write `contents` to `vendor/<relative>` inside the
    /// plugin directory.
    #[must_use]
    pub fn with_vendored_file(self, relative: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.vendored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((relative.into(), contents.into()));
        self
    }

    /// On the reconcile step, write `contents` to `<relative>` inside the
    /// plugin directory unless the file already exists, the way
    /// `cargo generate-lockfile` or `go mod tidy` do.
    #[must_use]
    pub fn with_lockfile(
        mut self,
        relative: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) -> Self {
        self.lockfile = Some((relative.into(), contents.into()));
        self
    }

    /// Make every later call fail as if the toolchain binary were missing.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(ToolchainStep, PathBuf)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of times `step` ran.
    #[must_use]
    pub fn runs_of(&self, step: ToolchainStep) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(s, _)| *s == step)
            .count()
    }

    fn push_failure(&self, dir: Option<PathBuf>, step: ToolchainStep, output: String) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InjectedFailure { dir, step, output });
    }

    fn reconcile(&self, working_dir: &Path) -> io::Result<()> {
        if let Some((relative, contents)) = &self.lockfile {
            let path = working_dir.join(relative);
            if !path.exists() {
                std::fs::write(path, contents)?;
            }
        }
        Ok(())
    }

    fn vendor(&self, working_dir: &Path) -> io::Result<()> {
        let vendored = self.vendored.lock().unwrap_or_else(PoisonError::into_inner);
        for (relative, contents) in vendored.iter() {
            let path = working_dir.join("vendor").join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }
}

impl DependencyToolchain for MockToolchain {
    fn run(&self, step: ToolchainStep, working_dir: &Path) -> io::Result<ToolchainOutput> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "mock toolchain is unreachable",
            ));
        }

        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((step, working_dir.to_path_buf()));

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| f.step == step && f.dir.as_deref().is_none_or(|d| d == working_dir))
            .cloned();
        if let Some(failure) = failure {
            return Ok(ToolchainOutput::failure(failure.output));
        }

        match step {
            ToolchainStep::Reconcile => self.reconcile(working_dir)?,
            ToolchainStep::Vendor => self.vendor(working_dir)?,
            ToolchainStep::Fetch => {},
        }
        Ok(ToolchainOutput::success(format!("{step}: ok")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_object_methods() {
        let object = StaticObject::new("Pinger")
            .with_method("ping", 0, Value::from("pong"))
            .with_variadic("log", Value::Null);

        assert_eq!(object.methods(), vec![
            Method::variadic("log"),
            Method::new("ping", 0)
        ]);
        assert_eq!(object.invoke("ping", vec![]).unwrap(), "pong");
        assert!(object.invoke("ping", vec![Value::Null]).is_err());
        assert!(object.invoke("missing", vec![]).is_err());
    }

    #[test]
    fn test_mock_engine_parses_arity_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("main.rhai");
        std::fs::write(&entry, r#"{"greet/1": "hi", "ping": "pong", "inner": {"x/2": 1}}"#)
            .unwrap();

        let engine = MockEngine::new();
        let mut session = engine.session(dir.path()).unwrap();
        let value = session.evaluate_path(&entry).unwrap();
        assert_eq!(value.methods(), vec![
            Method::new("greet", 1),
            Method::new("inner", 0),
            Method::new("ping", 0)
        ]);

        let inner = session.evaluate_symbol("inner").unwrap();
        assert_eq!(inner.methods(), vec![Method::new("x", 2)]);
        assert!(session.evaluate_symbol("absent").is_err());

        assert_eq!(engine.session_count(), 1);
        assert_eq!(engine.evaluation_count(), 1);
        assert_eq!(engine.symbol_lookup_count(), 2);
        assert_eq!(engine.resolution_roots(), vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_mock_toolchain_failures_and_vendor() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let toolchain = MockToolchain::new()
            .failing_in(b.path(), ToolchainStep::Fetch, "offline")
            .with_vendored_file("dep/lib.rhai", "fn dep() {}");

        assert!(toolchain.run(ToolchainStep::Fetch, a.path()).unwrap().success);
        let failed = toolchain.run(ToolchainStep::Fetch, b.path()).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.output, "offline");

        toolchain.run(ToolchainStep::Vendor, a.path()).unwrap();
        assert!(a.path().join("vendor/dep/lib.rhai").is_file());

        toolchain.set_unreachable(true);
        let err = toolchain.run(ToolchainStep::Reconcile, a.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(toolchain.call_count(), 3);
        assert_eq!(toolchain.runs_of(ToolchainStep::Fetch), 2);
    }

    #[test]
    fn test_mock_toolchain_writes_lockfile_once() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = MockToolchain::new().with_lockfile("Cargo.lock", "version = 3\n");

        toolchain.run(ToolchainStep::Fetch, dir.path()).unwrap();
        assert!(!dir.path().join("Cargo.lock").exists());

        toolchain.run(ToolchainStep::Reconcile, dir.path()).unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "edited").unwrap();
        toolchain.run(ToolchainStep::Reconcile, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("Cargo.lock")).unwrap(), "edited");
    }
}
