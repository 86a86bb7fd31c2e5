// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the replication engine.
//!
//! # Example
//!
//! ```
//! use mirror_sync::MirrorConfig;
//!
//! // Minimal config (uses defaults)
//! let config = MirrorConfig::default();
//! assert_eq!(config.database_name, "wordpress");
//! assert_eq!(config.cron_interval_secs, 900);
//!
//! // Multi-site config
//! let config = MirrorConfig {
//!     connection_uri: Some("memory://local".into()),
//!     multi_tenant: true,
//!     scan_page_size: 1,
//!     ..Default::default()
//! };
//! assert!(config.multi_tenant);
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::coordinator::FailurePolicy;

/// Configuration for the replication engine.
///
/// The connection uri and allow-lists are normally read from the host's
/// settings store at startup; values here are the fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Document store uri (e.g., "mongodb://localhost:27017" or "memory://local")
    #[serde(default)]
    pub connection_uri: Option<String>,

    /// Target database on the document store
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Relational table prefix; collection names follow the same scheme
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Switch tenant context per batch and read network-level settings
    #[serde(default)]
    pub multi_tenant: bool,

    #[serde(default = "default_main_tenant")]
    pub main_tenant: u64,

    /// Reconciliation recurrence
    #[serde(default = "default_cron_interval_secs")]
    pub cron_interval_secs: u64,

    /// Entities pulled per scan (1 = one entity per run)
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub overrides: Overrides,
}

fn default_database_name() -> String { "wordpress".to_string() }
fn default_table_prefix() -> String { "wp_".to_string() }
fn default_main_tenant() -> u64 { 1 }
fn default_cron_interval_secs() -> u64 { 15 * 60 }
fn default_scan_page_size() -> usize { 100 }

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            connection_uri: None,
            database_name: default_database_name(),
            table_prefix: default_table_prefix(),
            multi_tenant: false,
            main_tenant: default_main_tenant(),
            cron_interval_secs: default_cron_interval_secs(),
            scan_page_size: default_scan_page_size(),
            failure_policy: FailurePolicy::default(),
            overrides: Overrides::default(),
        }
    }
}

/// Startup-time customization table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Overrides {
    /// Replaces `database_name`
    #[serde(default)]
    pub database_name: Option<String>,

    /// Field keys never replicated, on top of the SyncMarker keys
    #[serde(default)]
    pub excluded_field_keys: Vec<String>,

    /// Replaces an allow-list setting, by setting key
    #[serde(default)]
    pub allow_lists: HashMap<String, Vec<String>>,

    /// Extra named recurrences for the cron table, in seconds
    #[serde(default)]
    pub cron_intervals: HashMap<String, u64>,
}
