//! Plugin loader orchestration.
//!
//! For each plugin location the loader:
//!
//! 1. fingerprints the plugin directory,
//! 2. returns the cached value on a hit (re-checked against the requested
//!    contract),
//! 3. otherwise prepares dependencies, evaluates the entry point, verifies
//!    the contract and caches the value.
//!
//! Concurrent loads of the same content prepare and evaluate it at most
//! once: a miss claims the fingerprint in the cache and re-checks before
//! doing any work. A failed attempt releases the claim without storing.
//!
//! A successful load is cached under the fingerprint taken before
//! preparation and, if the toolchain wrote into the plugin root, under the
//! fingerprint taken after it as well.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_config::ResolvedConfig;
use tracing::{debug, info, warn};

use crate::cache::PluginCache;
use crate::contract::{Contract, verify};
use crate::dependencies::DependencyPreparer;
use crate::discovery::find_plugin_roots;
use crate::engine::{InterpretationEngine, PluginValue};
use crate::error::PluginResult;
use crate::evaluate::evaluate;
use crate::fingerprint::{ContentFingerprint, DirectoryHasher};
use crate::location::{EntryPoint, LocationDefaults, PluginLocation};
use crate::toolchain::DependencyToolchain;

/// Progress of a single load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// Nothing has happened yet.
    Unresolved,
    /// Fingerprinting the plugin directory.
    Hashing,
    /// The fingerprint was cached; re-checking the contract.
    CacheHit,
    /// The fingerprint was not cached.
    CacheMiss,
    /// Running the dependency toolchain.
    PreparingDependencies,
    /// Evaluating the entry point.
    Evaluating,
    /// Checking the evaluated value against the contract.
    Verifying,
    /// Storing the verified value.
    Caching,
    /// The plugin was returned to the caller.
    Done,
    /// The attempt failed. Terminal; nothing is retried.
    Failed,
}

impl LoadStage {
    /// Whether the attempt has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use LoadStage::{
            CacheHit, CacheMiss, Caching, Done, Evaluating, Failed, Hashing,
            PreparingDependencies, Unresolved, Verifying,
        };
        matches!(
            (self, next),
            (Unresolved, Hashing)
                | (Hashing, CacheHit | CacheMiss | Failed)
                | (CacheHit, Done | Failed)
                | (CacheMiss, PreparingDependencies)
                | (PreparingDependencies, Evaluating | Failed)
                | (Evaluating, Verifying | Failed)
                | (Verifying, Caching | Failed)
                | (Caching, Done)
        )
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unresolved => "unresolved",
            Self::Hashing => "hashing",
            Self::CacheHit => "cache-hit",
            Self::CacheMiss => "cache-miss",
            Self::PreparingDependencies => "preparing-dependencies",
            Self::Evaluating => "evaluating",
            Self::Verifying => "verifying",
            Self::Caching => "caching",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Stage bookkeeping for one load.
struct Attempt<'a> {
    location: &'a PluginLocation,
    stage: LoadStage,
}

impl<'a> Attempt<'a> {
    fn new(location: &'a PluginLocation) -> Self {
        Self {
            location,
            stage: LoadStage::Unresolved,
        }
    }

    fn enter(&mut self, next: LoadStage) {
        debug_assert!(
            !self.stage.is_terminal(),
            "load already finished in {}",
            self.stage
        );
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal load transition {} -> {next}",
            self.stage
        );
        debug!(plugin = %self.location, from = %self.stage, stage = %next, "load stage");
        self.stage = next;
    }

    /// Run `f` in `stage`, moving to [`LoadStage::Failed`] if it errors.
    fn run<T>(
        &mut self,
        stage: LoadStage,
        f: impl FnOnce() -> PluginResult<T>,
    ) -> PluginResult<T> {
        self.enter(stage);
        f().inspect_err(|e| {
            debug!(plugin = %self.location, stage = %stage, error = %e, "load failed");
            self.stage = LoadStage::Failed;
        })
    }
}

/// Loader settings that do not involve collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Shared directory vendored dependencies are merged into.
    pub resolution_root: PathBuf,
    /// File marking a plugin root during discovery.
    pub manifest_marker: String,
    /// Vendor subdirectory produced by the toolchain. Excluded from the
    /// plugin fingerprint.
    pub vendor_dir: String,
    /// Entry conventions for plugins without an info file.
    pub defaults: LocationDefaults,
}

impl LoaderOptions {
    /// Default options rooted at `resolution_root`.
    pub fn new(resolution_root: impl Into<PathBuf>) -> Self {
        Self {
            resolution_root: resolution_root.into(),
            manifest_marker: "Cargo.toml".to_owned(),
            vendor_dir: "vendor".to_owned(),
            defaults: LocationDefaults::default(),
        }
    }

    /// Change the discovery marker.
    #[must_use]
    pub fn with_manifest_marker(mut self, marker: impl Into<String>) -> Self {
        self.manifest_marker = marker.into();
        self
    }

    /// Change the vendor subdirectory name.
    #[must_use]
    pub fn with_vendor_dir(mut self, vendor_dir: impl Into<String>) -> Self {
        self.vendor_dir = vendor_dir.into();
        self
    }

    /// Change the entry conventions.
    #[must_use]
    pub fn with_defaults(mut self, defaults: LocationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Options from a loaded configuration.
    #[must_use]
    pub fn from_config(resolved: &ResolvedConfig) -> Self {
        let plugins = &resolved.config.plugins;
        Self {
            resolution_root: resolved.resolution_root(),
            manifest_marker: plugins.manifest_marker.clone(),
            vendor_dir: plugins.vendor_dir.clone(),
            defaults: LocationDefaults {
                info_file: plugins.info_file.clone(),
                entry_file: PathBuf::from(&plugins.entry_file),
                entry: EntryPoint::from_symbol(plugins.entry_symbol.clone()),
            },
        }
    }
}

/// Loads, verifies and caches plugins.
pub struct PluginLoader {
    engine: Arc<dyn InterpretationEngine>,
    preparer: DependencyPreparer,
    hasher: DirectoryHasher,
    cache: Arc<PluginCache>,
    options: LoaderOptions,
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("options", &self.options)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl PluginLoader {
    /// Create a loader with its own empty cache.
    pub fn new(
        engine: Arc<dyn InterpretationEngine>,
        toolchain: Arc<dyn DependencyToolchain>,
        options: LoaderOptions,
    ) -> Self {
        let preparer = DependencyPreparer::new(toolchain, options.resolution_root.clone())
            .with_vendor_dir(options.vendor_dir.clone());
        let hasher = DirectoryHasher::new().exclude_dir(options.vendor_dir.clone());
        Self {
            engine,
            preparer,
            hasher,
            cache: Arc::new(PluginCache::new()),
            options,
        }
    }

    /// A loader using the rhai engine and the configured toolchain.
    #[cfg(feature = "rhai")]
    #[must_use]
    pub fn from_config(resolved: &ResolvedConfig) -> Self {
        let engine =
            crate::engine::RhaiEngine::new().with_max_operations(resolved.config.engine.max_operations);
        let toolchain =
            crate::toolchain::CommandToolchain::from_section(&resolved.config.toolchain);
        Self::new(
            Arc::new(engine),
            Arc::new(toolchain),
            LoaderOptions::from_config(resolved),
        )
    }

    /// Share a cache with other loaders.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PluginCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The plugin cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<PluginCache> {
        &self.cache
    }

    /// Loader settings.
    #[must_use]
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Fingerprint a plugin the way the loader keys its cache.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`](crate::PluginError::Io) if the plugin directory cannot be read.
    pub fn fingerprint(&self, location: &PluginLocation) -> PluginResult<ContentFingerprint> {
        self.hasher.hash(location.root())
    }

    /// Build a location for a plugin root using the configured conventions.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`](crate::PluginError::Manifest) or [`PluginError::Io`](crate::PluginError::Io) if the info
    /// file is malformed or unreadable.
    pub fn locate(&self, root: impl Into<PathBuf>) -> PluginResult<PluginLocation> {
        PluginLocation::from_root(root, &self.options.defaults)
    }

    /// Load one plugin as contract `C`.
    ///
    /// # Errors
    ///
    /// Any [`PluginError`](crate::PluginError); a value that does not satisfy `C` yields
    /// [`PluginError::ContractVerify`](crate::PluginError::ContractVerify).
    pub fn load_one<C: Contract>(&self, location: &PluginLocation) -> PluginResult<C> {
        self.load_value::<C>(location).map(C::adapt)
    }

    /// Load plugins in order.
    ///
    /// A plugin that does not satisfy `C` leaves `None` in its slot. Any
    /// other error aborts the batch, discarding results already produced.
    ///
    /// # Errors
    ///
    /// The first error that is not a contract mismatch.
    pub fn load_many<C: Contract>(
        &self,
        locations: &[PluginLocation],
    ) -> PluginResult<Vec<Option<C>>> {
        let mut loaded = Vec::with_capacity(locations.len());

        for location in locations {
            match self.load_one::<C>(location) {
                Ok(plugin) => loaded.push(Some(plugin)),
                Err(e) if e.is_contract_mismatch() => {
                    warn!(plugin = %location, contract = C::NAME, error = %e, "skipping plugin");
                    loaded.push(None);
                },
                Err(e) => return Err(e),
            }
        }

        Ok(loaded)
    }

    /// Discover plugin roots under each of `roots`, then load them as
    /// [`load_many`](Self::load_many) does.
    ///
    /// # Errors
    ///
    /// Discovery or info-file failures, and the first load error that is not
    /// a contract mismatch.
    pub fn load_many_recursive<C, I>(&self, roots: I) -> PluginResult<Vec<Option<C>>>
    where
        C: Contract,
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        let mut locations = Vec::new();
        for root in roots {
            for plugin_root in find_plugin_roots(root.as_ref(), &self.options.manifest_marker)? {
                locations.push(self.locate(plugin_root)?);
            }
        }
        self.load_many::<C>(&locations)
    }

    fn load_value<C: Contract>(&self, location: &PluginLocation) -> PluginResult<PluginValue> {
        let mut attempt = Attempt::new(location);

        attempt.enter(LoadStage::Hashing);
        let key = self.fingerprint(location).inspect_err(|e| {
            debug!(plugin = %location, error = %e, "hashing failed");
            attempt.stage = LoadStage::Failed;
        })?;

        if let Some(value) = self.cache.get(&key) {
            return self.reuse::<C>(&mut attempt, &key, value);
        }

        let _claim = self.cache.lock_key(key);
        if let Some(value) = self.cache.get(&key) {
            return self.reuse::<C>(&mut attempt, &key, value);
        }
        attempt.enter(LoadStage::CacheMiss);

        attempt.run(LoadStage::PreparingDependencies, || {
            self.preparer.prepare(location.root())
        })?;
        let value = attempt.run(LoadStage::Evaluating, || {
            evaluate(
                self.engine.as_ref(),
                location,
                self.preparer.resolution_root(),
            )
        })?;
        attempt.run(LoadStage::Verifying, || verify::<C>(value.as_ref(), location))?;

        attempt.enter(LoadStage::Caching);
        self.cache.set(key, Arc::clone(&value));
        self.cache_settled(location, key, &value);
        attempt.enter(LoadStage::Done);

        info!(plugin = %location, fingerprint = %key, contract = C::NAME, "plugin loaded");
        Ok(value)
    }

    /// Store `value` under the fingerprint the plugin has after preparation.
    ///
    /// Reconcile steps may write lockfiles into the plugin root, so the
    /// next load of unchanged sources hashes to this key rather than `key`.
    fn cache_settled(
        &self,
        location: &PluginLocation,
        key: ContentFingerprint,
        value: &PluginValue,
    ) {
        match self.fingerprint(location) {
            Ok(settled) if settled != key => {
                debug!(
                    plugin = %location,
                    fingerprint = %key,
                    settled = %settled,
                    "preparation changed plugin fingerprint"
                );
                self.cache.set(settled, Arc::clone(value));
            },
            Ok(_) => {},
            Err(e) => {
                warn!(plugin = %location, error = %e, "could not re-hash prepared plugin");
            },
        }
    }

    fn reuse<C: Contract>(
        &self,
        attempt: &mut Attempt<'_>,
        key: &ContentFingerprint,
        value: PluginValue,
    ) -> PluginResult<PluginValue> {
        debug!(plugin = %attempt.location, fingerprint = %key, "plugin cache hit");
        let location = attempt.location;
        attempt.run(LoadStage::CacheHit, || verify::<C>(value.as_ref(), location))?;
        attempt.enter(LoadStage::Done);
        Ok(value)
    }
}

impl From<&ResolvedConfig> for LoaderOptions {
    fn from(resolved: &ResolvedConfig) -> Self {
        Self::from_config(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        use LoadStage::*;

        let miss_path = [
            Unresolved,
            Hashing,
            CacheMiss,
            PreparingDependencies,
            Evaluating,
            Verifying,
            Caching,
            Done,
        ];
        for pair in miss_path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }

        assert!(Hashing.can_advance_to(CacheHit));
        assert!(CacheHit.can_advance_to(Done));
        assert!(Evaluating.can_advance_to(Failed));

        assert!(!Failed.can_advance_to(Hashing));
        assert!(!Done.can_advance_to(Hashing));
        assert!(!CacheMiss.can_advance_to(Evaluating));
        assert!(!Caching.can_advance_to(Failed));
        assert!(Done.is_terminal() && Failed.is_terminal());
        assert!(!Verifying.is_terminal());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "load already finished")]
    fn test_attempt_rejects_moves_after_terminal_stage() {
        let location = PluginLocation::new("/plugins/alpha", "main.rhai", EntryPoint::LastValue);
        let mut attempt = Attempt::new(&location);
        attempt.stage = LoadStage::Failed;
        attempt.enter(LoadStage::Hashing);
    }

    #[test]
    fn test_options_from_config() {
        let home = tempfile::tempdir().unwrap();
        let mut env = std::collections::HashMap::new();
        env.insert("QUARRY_MANIFEST_MARKER".to_owned(), "deps.toml".to_owned());
        let mut resolved = quarry_config::loader::load(None, Some(home.path()), &env).unwrap();
        resolved.config.plugins.entry_symbol = Some("plugin".to_owned());

        let options = LoaderOptions::from(&resolved);
        assert_eq!(options.resolution_root, home.path().join("deps"));
        assert_eq!(options.manifest_marker, "deps.toml");
        assert_eq!(options.vendor_dir, "vendor");
        assert_eq!(options.defaults.info_file, "plugin.toml");
        assert_eq!(options.defaults.entry_file, PathBuf::from("main.rhai"));
        assert_eq!(options.defaults.entry, EntryPoint::Symbol("plugin".into()));
    }

    #[test]
    fn test_options_builder() {
        let options = LoaderOptions::new("/srv/deps")
            .with_manifest_marker("deps.toml")
            .with_vendor_dir("third_party");
        assert_eq!(options.resolution_root, PathBuf::from("/srv/deps"));
        assert_eq!(options.manifest_marker, "deps.toml");
        assert_eq!(options.vendor_dir, "third_party");
        assert_eq!(options.defaults, LocationDefaults::default());
    }
}
