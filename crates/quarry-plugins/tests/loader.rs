//! Loader behaviour against the mock engine and toolchain.

use std::sync::Arc;

use quarry_plugins::{
    Capability, Contract, DependencyToolchain, InterpretationEngine, PluginError, PluginValue,
    ToolchainStep,
};
use quarry_test::{MockEngine, MockToolchain, TestWorkspace, init_test_logging, write_file};

struct Pinger(PluginValue);

impl Contract for Pinger {
    const NAME: &'static str = "Pinger";
    const CAPABILITIES: &'static [Capability] = &[Capability::new("ping", 0)];

    fn adapt(value: PluginValue) -> Self {
        Self(value)
    }
}

impl Pinger {
    fn ping(&self) -> serde_json::Value {
        self.0.invoke("ping", vec![]).unwrap()
    }
}

struct Greeter(PluginValue);

impl Contract for Greeter {
    const NAME: &'static str = "Greeter";
    const CAPABILITIES: &'static [Capability] = &[Capability::new("greet", 1)];

    fn adapt(value: PluginValue) -> Self {
        Self(value)
    }
}

const PINGER: &str = r#"{"ping": "pong"}"#;
const GREETER: &str = r#"{"greet/1": "hello"}"#;

fn setup() -> (TestWorkspace, MockEngine, Arc<MockToolchain>) {
    init_test_logging();
    (
        TestWorkspace::new(),
        MockEngine::new(),
        Arc::new(MockToolchain::new()),
    )
}

fn collaborators(
    engine: &MockEngine,
    toolchain: &Arc<MockToolchain>,
) -> (Arc<dyn InterpretationEngine>, Arc<dyn DependencyToolchain>) {
    (Arc::new(engine.clone()), Arc::clone(toolchain) as Arc<dyn DependencyToolchain>)
}

#[test]
fn test_same_content_is_loaded_once() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    let first = loader.load_one::<Pinger>(&location).unwrap();
    let second = loader.load_one::<Pinger>(&location).unwrap();

    assert!(Arc::ptr_eq(&first.0, &second.0));
    assert_eq!(first.ping(), "pong");
    assert_eq!(engine.evaluation_count(), 1);
    assert_eq!(toolchain.call_count(), 3);
    assert_eq!(loader.cache().len(), 1);
    assert_eq!(engine.resolution_roots(), vec![ws.resolution_root()]);
}

#[test]
fn test_changed_content_is_reloaded() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    loader.load_one::<Pinger>(&location).unwrap();
    write_file(&root, "main.rhai", r#"{"ping": "PONG"}"#);
    let reloaded = loader.load_one::<Pinger>(&location).unwrap();

    assert_eq!(reloaded.ping(), "PONG");
    assert_eq!(engine.evaluation_count(), 2);
    assert_eq!(loader.cache().len(), 2);
}

#[test]
fn test_vendored_output_does_not_invalidate_cache() {
    init_test_logging();
    let ws = TestWorkspace::new();
    let engine = MockEngine::new();
    let toolchain = Arc::new(MockToolchain::new().with_vendored_file("dep/lib.rhai", "fn dep() {}"));
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    loader.load_one::<Pinger>(&location).unwrap();
    assert!(root.join("vendor/dep/lib.rhai").is_file());
    assert!(ws.resolution_root().join("src/dep/lib.rhai").is_file());

    loader.load_one::<Pinger>(&location).unwrap();
    assert_eq!(engine.evaluation_count(), 1);
}

#[test]
fn test_contract_mismatch_fails_single_load() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("greeter", GREETER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    let err = loader.load_one::<Pinger>(&location).err().unwrap();
    assert!(err.is_contract_mismatch());
    assert!(err.to_string().contains("ping/0"));
    assert!(loader.cache().is_empty());

    assert!(loader.load_one::<Greeter>(&location).is_ok());
}

#[test]
fn test_contract_mismatch_is_skipped_in_batch() {
    let (ws, engine, toolchain) = setup();
    let pinger = ws.add_plugin("a", PINGER);
    let greeter = ws.add_plugin("b", GREETER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let locations = vec![
        loader.locate(&pinger).unwrap(),
        loader.locate(&greeter).unwrap(),
    ];

    let loaded = loader.load_many::<Pinger>(&locations).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].as_ref().unwrap().ping(), "pong");
    assert!(loaded[1].is_none());
}

#[test]
fn test_dependency_failure_aborts_batch() {
    let (ws, engine, _) = setup();
    let a = ws.add_plugin("a", PINGER);
    let b = ws.add_plugin("b", PINGER.replace("pong", "b").as_str());
    let c = ws.add_plugin("c", PINGER.replace("pong", "c").as_str());
    let toolchain = Arc::new(MockToolchain::new().failing_in(
        &b,
        ToolchainStep::Fetch,
        "error: failed to download `left-pad`\n",
    ));
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let locations: Vec<_> = [&a, &b, &c]
        .into_iter()
        .map(|root| loader.locate(root).unwrap())
        .collect();

    let err = loader.load_many::<Pinger>(&locations).err().unwrap();
    match err {
        PluginError::Dependency { step, dir, output } => {
            assert_eq!(step, "fetch");
            assert_eq!(dir, b);
            assert_eq!(output, "error: failed to download `left-pad`\n");
        },
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(engine.evaluation_count(), 1);
    assert!(toolchain.calls().iter().all(|(_, dir)| *dir != c));
}

#[test]
fn test_recursive_load_finds_nested_roots() {
    let (ws, engine, toolchain) = setup();
    let outer = ws.add_plugin("outer", PINGER);
    let inner = ws.add_plugin("outer/inner", PINGER.replace("pong", "inner").as_str());
    write_file(&ws.plugins_dir(), "notes/readme.md", "not a plugin");
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);

    let loaded = loader
        .load_many_recursive::<Pinger, _>([ws.plugins_dir()])
        .unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].as_ref().unwrap().ping(), "pong");
    assert_eq!(loaded[1].as_ref().unwrap().ping(), "inner");

    let dirs: Vec<_> = toolchain
        .calls()
        .into_iter()
        .filter(|(step, _)| *step == ToolchainStep::Reconcile)
        .map(|(_, dir)| dir)
        .collect();
    assert_eq!(dirs, vec![outer, inner]);
}

#[test]
fn test_info_file_selects_symbol() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", r#"{"exports": {"ping": "pong"}, "other": 1}"#);
    write_file(&root, "plugin.toml", "symbol = \"exports\"\n");
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);

    let loaded = loader
        .load_many_recursive::<Pinger, _>([ws.plugins_dir()])
        .unwrap();
    assert_eq!(loaded[0].as_ref().unwrap().ping(), "pong");
    assert_eq!(engine.symbol_lookup_count(), 1);
}

#[test]
fn test_malformed_info_file_aborts_discovery() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    write_file(&root, "plugin.toml", "symbol = [\n");
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);

    let err = loader
        .load_many_recursive::<Pinger, _>([ws.plugins_dir()])
        .err()
        .unwrap();
    assert!(matches!(err, PluginError::Manifest { .. }));
    assert_eq!(toolchain.call_count(), 0);
}

#[test]
fn test_failed_evaluation_is_not_cached() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("broken", "{ not json");
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    for _ in 0..2 {
        let err = loader.load_one::<Pinger>(&location).err().unwrap();
        assert!(matches!(err, PluginError::Evaluation { .. }));
    }
    assert_eq!(engine.evaluation_count(), 2);
    assert!(loader.cache().is_empty());
}

#[test]
fn test_cache_hit_is_rechecked_against_contract() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    loader.load_one::<PluginValue>(&location).unwrap();
    let err = loader.load_one::<Greeter>(&location).err().unwrap();

    assert!(err.is_contract_mismatch());
    assert_eq!(engine.evaluation_count(), 1);
    assert_eq!(toolchain.call_count(), 3);
}

#[test]
fn test_shared_cache_across_loaders() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let first = ws.loader(e, t);

    let other_engine = MockEngine::new();
    let (e2, t2) = collaborators(&other_engine, &toolchain);
    let second = ws.loader(e2, t2).with_cache(Arc::clone(first.cache()));

    let location = first.locate(&root).unwrap();
    first.load_one::<Pinger>(&location).unwrap();
    second.load_one::<Pinger>(&location).unwrap();

    assert_eq!(engine.evaluation_count(), 1);
    assert_eq!(other_engine.evaluation_count(), 0);
}

#[test]
fn test_concurrent_loads_evaluate_once() {
    let (ws, engine, toolchain) = setup();
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| loader.load_one::<Pinger>(&location).map(|p| p.ping())))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "pong");
        }
    });

    assert_eq!(engine.evaluation_count(), 1);
    assert_eq!(toolchain.runs_of(ToolchainStep::Vendor), 1);
}

#[test]
fn test_lockfile_written_by_reconcile_does_not_invalidate_cache() {
    init_test_logging();
    let ws = TestWorkspace::new();
    let engine = MockEngine::new();
    let toolchain = Arc::new(MockToolchain::new().with_lockfile("Cargo.lock", "version = 3\n"));
    let root = ws.add_plugin("alpha", PINGER);
    let (e, t) = collaborators(&engine, &toolchain);
    let loader = ws.loader(e, t);
    let location = loader.locate(&root).unwrap();

    let first = loader.load_one::<PluginValue>(&location).unwrap();
    assert!(root.join("Cargo.lock").is_file());
    let second = loader.load_one::<PluginValue>(&location).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.evaluation_count(), 1);
    assert_eq!(toolchain.call_count(), 3);
    assert_eq!(loader.cache().len(), 2);

    // Editing the sources still forces a reload.
    write_file(&root, "main.rhai", r#"{"ping": "PONG"}"#);
    loader.load_one::<PluginValue>(&location).unwrap();
    assert_eq!(engine.evaluation_count(), 2);
}
