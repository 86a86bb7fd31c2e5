// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process document store.
//!
//! Behaves like a document database collection for the operations the
//! replication sink uses: filter-subset matching, `$set`-style upsert that
//! reports a generated id only on insert, and single/multi delete.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entity::{Document, DocumentId};
use super::traits::{CollectionRef, DocumentStore, DocumentStoreConnector, StoreError, UpsertOutcome};

/// Field holding the generated document id.
pub const ID_FIELD: &str = "_id";

pub struct InMemoryDocumentStore {
    collections: DashMap<CollectionRef, Vec<Document>>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
        }
    }

    /// Number of documents in a collection
    #[must_use]
    pub fn len(&self, collection: &CollectionRef) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    /// Check if every collection is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(|entry| entry.value().is_empty())
    }

    /// Documents matching `filter`, in insertion order
    pub fn find(&self, collection: &CollectionRef, filter: &Document) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| matches(doc, filter)).cloned().collect())
            .unwrap_or_default()
    }

    /// Names of collections that have been written to
    pub fn collections(&self) -> Vec<CollectionRef> {
        let mut names: Vec<CollectionRef> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        names
    }

    /// Clear all collections
    pub fn clear(&self) {
        self.collections.clear();
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, value)| doc.get(field) == Some(value))
}

fn generate_id() -> DocumentId {
    // 24 hex chars, same width as a BSON ObjectId
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn upsert(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        update: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut docs = self.collections.entry(collection.clone()).or_default();

        if let Some(existing) = docs.iter_mut().find(|doc| matches(doc, filter)) {
            for (field, value) in update {
                if field != ID_FIELD {
                    existing.insert(field.clone(), value.clone());
                }
            }
            return Ok(UpsertOutcome { matched: 1, upserted_id: None });
        }

        let id = generate_id();
        let mut doc = filter.clone();
        for (field, value) in update {
            doc.insert(field.clone(), value.clone());
        }
        doc.insert(ID_FIELD.to_string(), serde_json::Value::String(id.clone()));
        docs.push(doc);

        Ok(UpsertOutcome { matched: 0, upserted_id: Some(id) })
    }

    async fn delete_one(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        match docs.iter().position(|doc| matches(doc, filter)) {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !matches(doc, filter));
        Ok((before - docs.len()) as u64)
    }
}

/// Connector for `memory://` uris, handing out one shared store.
pub struct MemoryConnector {
    store: Arc<InMemoryDocumentStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<InMemoryDocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DocumentStoreConnector for MemoryConnector {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        let is_memory = uri
            .split_once("://")
            .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("memory"));
        if !is_memory {
            return Err(StoreError::InvalidUri(uri.to_string()));
        }
        Ok(self.store.clone())
    }
}
