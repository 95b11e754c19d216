//! Post-merge configuration validation.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_plugins(config)?;
    validate_toolchain(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_plugins(config: &Config) -> ConfigResult<()> {
    let p = &config.plugins;

    for (field, value) in [
        ("plugins.manifest_marker", &p.manifest_marker),
        ("plugins.info_file", &p.info_file),
        ("plugins.vendor_dir", &p.vendor_dir),
    ] {
        if !is_bare_file_name(value) {
            return Err(ConfigError::ValidationError {
                field: field.to_owned(),
                message: format!("'{value}' must be a bare file name without separators"),
            });
        }
    }

    if p.entry_file.is_empty() || Path::new(&p.entry_file).is_absolute() {
        return Err(ConfigError::ValidationError {
            field: "plugins.entry_file".to_owned(),
            message: "entry_file must be a non-empty path relative to the plugin root"
                .to_owned(),
        });
    }

    if p.entry_symbol.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::ValidationError {
            field: "plugins.entry_symbol".to_owned(),
            message: "entry_symbol must not be empty when set".to_owned(),
        });
    }

    Ok(())
}

fn validate_toolchain(config: &Config) -> ConfigResult<()> {
    let t = &config.toolchain;

    if t.program.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "toolchain.program".to_owned(),
            message: "program must not be empty".to_owned(),
        });
    }

    for (field, args) in [
        ("toolchain.reconcile", &t.reconcile),
        ("toolchain.fetch", &t.fetch),
        ("toolchain.vendor", &t.vendor),
    ] {
        if args.is_empty() {
            return Err(ConfigError::ValidationError {
                field: field.to_owned(),
                message: "step needs at least one argument".to_owned(),
            });
        }
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;

    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unknown level '{}'; expected one of: trace, debug, info, warn, error, off",
                l.level
            ),
        });
    }

    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unknown format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        });
    }

    Ok(())
}

fn is_bare_file_name(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains('/')
        && !value.contains('\\')
}
