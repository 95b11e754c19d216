//! Content-addressed plugin loading for quarry.
//!
//! Plugins are directories of source code that a host loads at runtime and
//! uses through a caller-chosen capability contract:
//!
//! - [`hash_directory`] / [`hash_arguments`]: content fingerprints
//! - [`PluginCache`]: fingerprint → value, at most one load per content
//! - [`DependencyPreparer`]: reconcile, fetch and vendor via a [`DependencyToolchain`]
//! - [`evaluate`]: run a plugin's entry point in an [`InterpretationEngine`]
//! - [`Contract`] / [`verify_capabilities`]: structural method-table checks
//! - [`find_plugin_roots`]: marker-file discovery
//! - [`PluginLoader`]: the orchestrator tying the above together
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry_plugins::{Capability, Contract, PluginLoader, PluginValue};
//!
//! struct Pinger(PluginValue);
//!
//! impl Contract for Pinger {
//!     const NAME: &'static str = "Pinger";
//!     const CAPABILITIES: &'static [Capability] = &[Capability::new("ping", 0)];
//!
//!     fn adapt(value: PluginValue) -> Self {
//!         Self(value)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = quarry_config::Config::load(Some(std::path::Path::new(".")))?;
//! let loader = PluginLoader::from_config(&resolved);
//!
//! for pinger in loader.load_many_recursive::<Pinger, _>(["plugins"])?.into_iter().flatten() {
//!     println!("{}", pinger.0.invoke("ping", vec![])?);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod contract;
pub mod dependencies;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod fingerprint;
pub mod loader;
pub mod location;
pub mod toolchain;

pub use cache::{KeyGuard, PluginCache};
pub use contract::{Capability, Contract, verify, verify_capabilities};
pub use dependencies::DependencyPreparer;
pub use discovery::find_plugin_roots;
#[cfg(feature = "rhai")]
pub use engine::RhaiEngine;
pub use engine::{EngineSession, InterpretationEngine, Method, PluginObject, PluginValue};
pub use error::{PluginError, PluginResult};
pub use evaluate::evaluate;
pub use fingerprint::{
    ArgumentHasher, ContentFingerprint, DirectoryHasher, hash_arguments, hash_directory,
};
pub use loader::{LoadStage, LoaderOptions, PluginLoader};
pub use location::{EntryPoint, LocationDefaults, PluginLocation};
pub use toolchain::{CommandToolchain, DependencyToolchain, ToolchainOutput, ToolchainStep};
