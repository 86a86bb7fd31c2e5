// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store drivers, selected by uri scheme.

use std::collections::HashMap;
use std::sync::Arc;

use super::memory::{InMemoryDocumentStore, MemoryConnector};
use super::traits::{DocumentStore, DocumentStoreConnector, StoreError};

#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DocumentStoreConnector>>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that serves `memory://` from the given store.
    pub fn with_memory(store: Arc<InMemoryDocumentStore>) -> Self {
        let mut registry = Self::new();
        registry.register("memory", Arc::new(MemoryConnector::new(store)));
        registry
    }

    pub fn register(&mut self, scheme: &str, connector: Arc<dyn DocumentStoreConnector>) {
        self.drivers.insert(scheme.to_ascii_lowercase(), connector);
    }

    /// Connector for a uri, or `InvalidUri` when no driver handles its scheme.
    pub fn connector_for(&self, uri: &str) -> Result<Arc<dyn DocumentStoreConnector>, StoreError> {
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;

        self.drivers
            .get(&scheme)
            .cloned()
            .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))
    }

    pub async fn connect(&self, uri: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        self.connector_for(uri)?.connect(uri).await
    }
}
