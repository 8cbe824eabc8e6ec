//! Knobs read from the environment
//!
//! Loaded once per [`Repository`](crate::areas::repository::Repository) handle.
//! Unset variables take their defaults; a malformed value is an error naming the
//! variable.

use crate::artifacts::commit_graph::bloom::{
    BloomSettings, DEFAULT_BITS_PER_ENTRY, DEFAULT_MAX_CHANGED_PATHS, DEFAULT_NUM_HASHES,
};
use crate::artifacts::commit_graph::chain::LoadOptions;
use anyhow::{Context, bail};
use std::str::FromStr;

pub const COMMIT_GRAPH: &str = "BIT_COMMIT_GRAPH";
pub const MULTI_PACK_INDEX: &str = "BIT_MULTI_PACK_INDEX";
pub const READ_CHANGED_PATHS: &str = "BIT_COMMIT_GRAPH_READ_CHANGED_PATHS";
pub const VERIFY_ON_LOAD: &str = "BIT_COMMIT_GRAPH_VERIFY_ON_LOAD";
pub const CHANGED_PATHS_VERSION: &str = "BIT_CHANGED_PATHS_VERSION";
pub const BLOOM_NUM_HASHES: &str = "BIT_TEST_BLOOM_SETTINGS_NUM_HASHES";
pub const BLOOM_BITS_PER_ENTRY: &str = "BIT_TEST_BLOOM_SETTINGS_BITS_PER_ENTRY";
pub const BLOOM_MAX_CHANGED_PATHS: &str = "BIT_TEST_BLOOM_SETTINGS_MAX_CHANGED_PATHS";
pub const MAX_NEW_FILTERS: &str = "BIT_COMMIT_GRAPH_MAX_NEW_FILTERS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub commit_graph: bool,
    pub multi_pack_index: bool,
    pub read_changed_paths: bool,
    pub verify_on_load: bool,
    pub bloom: BloomSettings,
    pub max_new_filters: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            commit_graph: true,
            multi_pack_index: true,
            read_changed_paths: true,
            verify_on_load: false,
            bloom: BloomSettings::default(),
            max_new_filters: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bool_var = |name: &str, default: bool| -> anyhow::Result<bool> {
            lookup(name)
                .map(|value| parse_bool(&value).with_context(|| format!("invalid value for {name}")))
                .transpose()
                .map(|value| value.unwrap_or(default))
        };
        let u32_var = |name: &str| -> anyhow::Result<Option<u32>> {
            lookup(name)
                .map(|value| parse_number(&value).with_context(|| format!("invalid value for {name}")))
                .transpose()
        };

        let hash_version = u32_var(CHANGED_PATHS_VERSION)?.unwrap_or(1);
        if !matches!(hash_version, 1 | 2) {
            bail!("invalid value for {CHANGED_PATHS_VERSION}: {hash_version} is not 1 or 2");
        }

        let num_hashes = u32_var(BLOOM_NUM_HASHES)?.unwrap_or(DEFAULT_NUM_HASHES);
        if num_hashes == 0 {
            bail!("invalid value for {BLOOM_NUM_HASHES}: must be positive");
        }

        Ok(Settings {
            commit_graph: bool_var(COMMIT_GRAPH, true)?,
            multi_pack_index: bool_var(MULTI_PACK_INDEX, true)?,
            read_changed_paths: bool_var(READ_CHANGED_PATHS, true)?,
            verify_on_load: bool_var(VERIFY_ON_LOAD, false)?,
            bloom: BloomSettings {
                hash_version,
                num_hashes,
                bits_per_entry: u32_var(BLOOM_BITS_PER_ENTRY)?.unwrap_or(DEFAULT_BITS_PER_ENTRY),
                max_changed_paths: u32_var(BLOOM_MAX_CHANGED_PATHS)?
                    .unwrap_or(DEFAULT_MAX_CHANGED_PATHS),
            },
            max_new_filters: u32_var(MAX_NEW_FILTERS)?,
        })
    }

    pub fn graph_load_options(&self) -> LoadOptions {
        LoadOptions {
            read_changed_paths: self.read_changed_paths,
            verify_checksums: self.verify_on_load,
        }
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("'{other}' is not a boolean"),
    }
}

fn parse_number(value: &str) -> anyhow::Result<u32> {
    u32::from_str(value.trim()).with_context(|| format!("'{value}' is not a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let vars = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn unset_variables_take_defaults() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn variables_override_defaults() {
        let settings = settings(&[
            (COMMIT_GRAPH, "false"),
            (VERIFY_ON_LOAD, "1"),
            (CHANGED_PATHS_VERSION, "2"),
            (BLOOM_MAX_CHANGED_PATHS, "3"),
            (MAX_NEW_FILTERS, "10"),
        ])
        .unwrap();

        assert!(!settings.commit_graph);
        assert!(settings.multi_pack_index);
        assert!(settings.verify_on_load);
        assert_eq!(settings.bloom.hash_version, 2);
        assert_eq!(settings.bloom.max_changed_paths, 3);
        assert_eq!(settings.bloom.num_hashes, DEFAULT_NUM_HASHES);
        assert_eq!(settings.max_new_filters, Some(10));
        assert!(settings.graph_load_options().verify_checksums);
    }

    #[rstest]
    #[case(COMMIT_GRAPH, "maybe")]
    #[case(MAX_NEW_FILTERS, "-1")]
    #[case(CHANGED_PATHS_VERSION, "3")]
    #[case(BLOOM_NUM_HASHES, "0")]
    fn malformed_values_name_the_variable(#[case] name: &str, #[case] value: &str) {
        let err = settings(&[(name, value)]).unwrap_err();

        assert!(err.to_string().contains(name), "{err:#}");
    }
}
