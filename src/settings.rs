// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Host settings and their startup resolution.
//!
//! Settings come from the host's option storage through [`SettingsStore`].
//! In multi-tenant mode they are read from the network-level namespace.
//! Everything is resolved once, at startup, into [`ResolvedSettings`]
//! together with the [`Overrides`] table from the config.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{MirrorConfig, Overrides};
use crate::eligibility::AllowLists;
use crate::storage::traits::marker_keys;

/// Setting keys read from the host.
pub mod keys {
    pub const CONNECTION_URI: &str = "mirror-sync-connection-uri";
    pub const OBJECT_TYPES: &str = "mirror-sync-object-types";
    pub const OBJECT_STATUS: &str = "mirror-sync-object-status";
    pub const TAXONOMY_TYPES: &str = "mirror-sync-taxonomy-types";
    /// List whose first element is the flag
    pub const CRON_ENABLE: &str = "mirror-sync-cron-enable";
}

/// Host option storage.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str, default: Value) -> Value;
}

/// Namespace a setting key is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsScope {
    Site,
    Network,
}

impl SettingsScope {
    #[must_use]
    pub fn for_mode(multi_tenant: bool) -> Self {
        if multi_tenant { Self::Network } else { Self::Site }
    }

    pub fn key(&self, key: &str) -> String {
        match self {
            Self::Site => key.to_string(),
            Self::Network => format!("_network_options_{}", key),
        }
    }

    pub fn get(&self, store: &dyn SettingsStore, key: &str, default: Value) -> Value {
        store.get_setting(&self.key(key), default)
    }
}

/// In-memory settings store.
#[derive(Default)]
pub struct StaticSettings {
    values: RwLock<HashMap<String, Value>>,
}

impl StaticSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    /// Set a key in the given namespace
    pub fn set_scoped(&self, scope: SettingsScope, key: &str, value: Value) {
        self.set(scope.key(key), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }
}

impl SettingsStore for StaticSettings {
    fn get_setting(&self, key: &str, default: Value) -> Value {
        self.values.read().get(key).cloned().unwrap_or(default)
    }
}

/// Read a list setting. A bare string counts as a one-element list.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !matches!(s.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "off" | "no"),
        _ => false,
    }
}

/// Settings after merging host values, config and overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    pub scope: SettingsScope,
    pub connection_uri: Option<String>,
    pub database_name: String,
    pub allow_lists: AllowLists,
    pub excluded_field_keys: HashSet<String>,
    pub cron_enabled: bool,
    /// Extra recurrences (name, seconds)
    pub cron_intervals: Vec<(String, u64)>,
}

impl ResolvedSettings {
    pub fn resolve(config: &MirrorConfig, store: &dyn SettingsStore) -> Self {
        let scope = SettingsScope::for_mode(config.multi_tenant);
        let overrides = &config.overrides;

        let connection_uri = scope
            .get(store, keys::CONNECTION_URI, Value::Null)
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| config.connection_uri.clone().filter(|s| !s.trim().is_empty()));

        let list = |key: &str| -> Vec<String> {
            match overrides.allow_lists.get(key) {
                Some(list) => list.clone(),
                None => string_list(&scope.get(store, key, Value::Array(vec![]))),
            }
        };
        let allow_lists = AllowLists {
            content_types: list(keys::OBJECT_TYPES),
            content_statuses: list(keys::OBJECT_STATUS),
            taxonomies: list(keys::TAXONOMY_TYPES),
        };

        let cron_enabled = match scope.get(store, keys::CRON_ENABLE, Value::Array(vec![])) {
            Value::Array(items) => items.first().map_or(false, truthy),
            other => truthy(&other),
        };

        Self {
            scope,
            connection_uri,
            database_name: overrides.database_name.clone().unwrap_or_else(|| config.database_name.clone()),
            allow_lists,
            excluded_field_keys: excluded_field_keys(overrides),
            cron_enabled,
            cron_intervals: sorted_intervals(overrides),
        }
    }
}

fn excluded_field_keys(overrides: &Overrides) -> HashSet<String> {
    marker_keys::ALL
        .iter()
        .map(|k| k.to_string())
        .chain(overrides.excluded_field_keys.iter().cloned())
        .collect()
}

fn sorted_intervals(overrides: &Overrides) -> Vec<(String, u64)> {
    let mut intervals: Vec<(String, u64)> = overrides
        .cron_intervals
        .iter()
        .map(|(name, secs)| (name.clone(), *secs))
        .collect();
    intervals.sort();
    intervals
}
