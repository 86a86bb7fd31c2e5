// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication sink: the write protocol against the document store.

use std::sync::Arc;

use tracing::trace;

use crate::entity::{Document, DocumentId, EntityKind};
use crate::metrics::{self, LatencyTimer};
use crate::storage::traits::{CollectionRef, DocumentStore, StoreError};

pub struct ReplicationSink {
    store: Arc<dyn DocumentStore>,
    database: String,
}

fn status<T>(result: &Result<T, StoreError>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}

impl ReplicationSink {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self, name: impl Into<String>) -> CollectionRef {
        CollectionRef::new(self.database.clone(), name)
    }

    /// Upsert keyed by `filter`. Returns the new document id only when the
    /// call inserted.
    pub async fn upsert(
        &self,
        kind: EntityKind,
        collection: &CollectionRef,
        filter: &Document,
        document: &Document,
    ) -> Result<Option<DocumentId>, StoreError> {
        let _timer = LatencyTimer::new("upsert");
        let result = self.store.upsert(collection, filter, document).await;
        metrics::record_sink_operation(kind, "upsert", status(&result));

        let outcome = result?;
        trace!(%collection, matched = outcome.matched, inserted = outcome.upserted_id.is_some(), "Upserted");
        Ok(outcome.upserted_id)
    }

    /// Remove at most one document; a missing document is not an error.
    pub async fn delete_one(&self, kind: EntityKind, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        let _timer = LatencyTimer::new("delete");
        let result = self.store.delete_one(collection, filter).await;
        metrics::record_sink_operation(kind, "delete", status(&result));
        result
    }

    /// Remove every document matching the pattern.
    pub async fn delete_many(&self, kind: EntityKind, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        let _timer = LatencyTimer::new("delete_many");
        let result = self.store.delete_many(collection, filter).await;
        metrics::record_sink_operation(kind, "delete_many", status(&result));
        result
    }
}
