//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override. They are only applied to fields
//! that no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `QUARRY_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "QUARRY_RESOLUTION_ROOT",
        field_path: "plugins.resolution_root",
    },
    EnvMapping {
        var_name: "QUARRY_MANIFEST_MARKER",
        field_path: "plugins.manifest_marker",
    },
    EnvMapping {
        var_name: "QUARRY_TOOLCHAIN",
        field_path: "toolchain.program",
    },
    EnvMapping {
        var_name: "QUARRY_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "QUARRY_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Snapshot the process environment, keeping only `QUARRY_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("QUARRY_"))
        .collect()
}

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        if sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults)
        {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "applying env var fallback"
            );

            set_string_field(merged, mapping.field_path, val);
            sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
            count = count.saturating_add(1);
        }
    }

    count
}

/// Set a `section.field` path to a string value, creating the section when
/// it is missing.
fn set_string_field(root: &mut toml::Value, path: &str, val: &str) {
    let Some((section, field)) = path.split_once('.') else {
        return;
    };
    let Some(table) = root.as_table_mut() else {
        return;
    };
    let section = table
        .entry(section.to_owned())
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    if let Some(section) = section.as_table_mut() {
        section.insert(field.to_owned(), toml::Value::String(val.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn fallback_fills_unset_fields() {
        let mut merged: toml::Value = toml::from_str("[toolchain]\nprogram = \"cargo\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("toolchain.program".to_owned(), ConfigLayer::Defaults);

        let applied = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[
                ("QUARRY_TOOLCHAIN", "/usr/local/bin/deps"),
                ("QUARRY_RESOLUTION_ROOT", "/srv/quarry"),
            ]),
        );

        assert_eq!(applied, 2);
        assert_eq!(
            merged["toolchain"]["program"].as_str(),
            Some("/usr/local/bin/deps")
        );
        assert_eq!(
            merged["plugins"]["resolution_root"].as_str(),
            Some("/srv/quarry")
        );
    }

    #[test]
    fn file_layers_win_over_env() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::User);

        let applied = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("QUARRY_LOG_LEVEL", "trace")]),
        );

        assert_eq!(applied, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }
}
