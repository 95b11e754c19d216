//! Dynamic evaluation of a plugin's entry point.

use std::path::Path;

use tracing::debug;

use crate::engine::{InterpretationEngine, PluginValue};
use crate::error::PluginResult;
use crate::location::{EntryPoint, PluginLocation};

/// Evaluate the plugin at `location` in a fresh engine session.
///
/// Imports resolve against `resolution_root`. No caching and no contract
/// checks happen here.
///
/// # Errors
///
/// Returns [`PluginError::Evaluation`](crate::PluginError::Evaluation) if the
/// entry file fails to parse or run, or the entry symbol is undefined.
pub fn evaluate(
    engine: &dyn InterpretationEngine,
    location: &PluginLocation,
    resolution_root: &Path,
) -> PluginResult<PluginValue> {
    let mut session = engine.session(resolution_root)?;
    let value = session.evaluate_path(location.entry_file())?;

    let value = match location.entry() {
        EntryPoint::LastValue => value,
        EntryPoint::Symbol(name) => session.evaluate_symbol(name)?,
    };

    debug!(
        plugin = %location,
        entry = %location.entry(),
        type_name = value.type_name(),
        "evaluated plugin"
    );
    Ok(value)
}
