// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Enqueue-time eligibility.
//!
//! Content items and terms are replicated only when their type/status or
//! taxonomy is on the configured allow-list. An empty list rejects
//! everything. Users, settings and sites are not allow-list filtered.
//!
//! The scanner asks the same filter for a [`ScanScope`]; an empty list there
//! means "nothing to scan", never "scan everything".

use std::collections::HashSet;

use crate::entity::{Classification, EntityKind};
use crate::storage::traits::ScanScope;

/// Allow-lists per filtered kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowLists {
    pub content_types: Vec<String>,
    pub content_statuses: Vec<String>,
    pub taxonomies: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    lists: AllowLists,
    excluded_field_keys: HashSet<String>,
}

impl EligibilityFilter {
    pub fn new(lists: AllowLists, excluded_field_keys: HashSet<String>) -> Self {
        Self { lists, excluded_field_keys }
    }

    pub fn allow_lists(&self) -> &AllowLists {
        &self.lists
    }

    /// Whether a mutation of `kind`, classified as given, is in scope.
    #[must_use]
    pub fn is_eligible(&self, kind: EntityKind, classification: &Classification) -> bool {
        match kind {
            EntityKind::ContentItem => match classification {
                Classification::ContentItem { post_type, status } => {
                    self.lists.content_types.contains(post_type) && self.lists.content_statuses.contains(status)
                }
                _ => false,
            },
            EntityKind::TaxonomyTerm => match classification {
                Classification::Term { taxonomy } => self.lists.taxonomies.contains(taxonomy),
                _ => false,
            },
            EntityKind::User | EntityKind::Setting | EntityKind::Site => true,
            // Field rows follow their own rules (see is_field_key_excluded)
            _ => true,
        }
    }

    #[must_use]
    pub fn is_field_key_excluded(&self, key: &str) -> bool {
        self.excluded_field_keys.contains(key)
    }

    /// What the scanner should look for, or `None` when there is nothing eligible.
    pub fn scan_scope(&self, kind: EntityKind) -> Option<ScanScope> {
        match kind {
            EntityKind::ContentItem => {
                if self.lists.content_types.is_empty() || self.lists.content_statuses.is_empty() {
                    return None;
                }
                Some(ScanScope::ContentItems {
                    types: self.lists.content_types.clone(),
                    statuses: self.lists.content_statuses.clone(),
                })
            }
            EntityKind::TaxonomyTerm => {
                if self.lists.taxonomies.is_empty() {
                    return None;
                }
                Some(ScanScope::Terms { taxonomies: self.lists.taxonomies.clone() })
            }
            EntityKind::User => Some(ScanScope::Users),
            _ => None,
        }
    }
}
