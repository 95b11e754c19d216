//! Capability contracts and structural verification.
//!
//! A [`Contract`] names a set of required [`Capability`]s and adapts a
//! verified [`PluginValue`] into a typed handle. Verification compares the
//! value's method table against the required set and reports every missing
//! or mismatched capability at once.
//!
//! ```
//! use quarry_plugins::{Capability, Contract, PluginResult, PluginValue};
//!
//! struct Greeter(PluginValue);
//!
//! impl Contract for Greeter {
//!     const NAME: &'static str = "Greeter";
//!     const CAPABILITIES: &'static [Capability] = &[Capability::new("greet", 1)];
//!
//!     fn adapt(value: PluginValue) -> Self {
//!         Self(value)
//!     }
//! }
//!
//! impl Greeter {
//!     fn greet(&self, name: &str) -> PluginResult<serde_json::Value> {
//!         self.0.invoke("greet", vec![name.into()])
//!     }
//! }
//! ```

use std::fmt;
use std::path::Path;

use crate::engine::{PluginObject, PluginValue};
use crate::error::{PluginError, PluginResult};
use crate::location::PluginLocation;

/// A required method: name and parameter count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    /// Method name.
    pub name: &'static str,
    /// Number of parameters.
    pub arity: usize,
}

impl Capability {
    /// Create a capability.
    #[must_use]
    pub const fn new(name: &'static str, arity: usize) -> Self {
        Self { name, arity }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A typed view over plugin values that provide a fixed capability set.
pub trait Contract: Sized + Send + Sync + 'static {
    /// Contract name used in diagnostics.
    const NAME: &'static str;

    /// Methods a plugin value must expose.
    const CAPABILITIES: &'static [Capability];

    /// Wrap a value that has passed verification.
    fn adapt(value: PluginValue) -> Self;
}

/// The empty contract: any value is accepted as-is.
impl Contract for PluginValue {
    const NAME: &'static str = "any";
    const CAPABILITIES: &'static [Capability] = &[];

    fn adapt(value: PluginValue) -> Self {
        value
    }
}

/// Check `value` against contract `C`.
///
/// # Errors
///
/// Returns [`PluginError::ContractVerify`] listing every missing capability.
pub fn verify<C: Contract>(value: &dyn PluginObject, location: &PluginLocation) -> PluginResult<()> {
    verify_capabilities(value, C::NAME, C::CAPABILITIES, location.root())
}

/// Check `value` against an explicit capability set.
///
/// A method whose arity the engine cannot report satisfies any arity.
///
/// # Errors
///
/// Returns [`PluginError::ContractVerify`] listing every missing capability.
pub fn verify_capabilities(
    value: &dyn PluginObject,
    contract: &str,
    required: &[Capability],
    plugin: &Path,
) -> PluginResult<()> {
    let methods = value.methods();
    let mut problems = Vec::new();

    for capability in required {
        let candidates: Vec<_> = methods
            .iter()
            .filter(|m| m.name == capability.name)
            .collect();

        if candidates.is_empty() {
            problems.push(format!("missing method `{capability}`"));
        } else if !candidates
            .iter()
            .any(|m| m.arity.is_none_or(|arity| arity == capability.arity))
        {
            let found: Vec<String> = candidates.iter().map(ToString::to_string).collect();
            problems.push(format!(
                "method `{}` has signature {}, expected `{capability}`",
                capability.name,
                found.join(", ")
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(PluginError::ContractVerify {
            contract: contract.to_owned(),
            plugin: plugin.to_path_buf(),
            message: format!("{} ({})", problems.join("; "), value.type_name()),
        })
    }
}
