// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collaborator seams: the document store driver, the relational store the
//! reconciliation scanner reads, SyncMarker persistence and named counters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::entity::{Document, DocumentId, Entity, EntityKind, TenantId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("No driver registered for uri '{0}'")]
    InvalidUri(String),
}

impl StoreError {
    /// Worth another attempt: the backend or the link failed, not the request.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Connection(_))
    }
}

/// Field keys of the SyncMarker, stored as entity meta rows.
pub mod marker_keys {
    pub const IS_SYNCED: &str = "mirror_sync_is_synced";
    pub const LAST_SYNC: &str = "mirror_sync_last_sync";
    pub const SITE_ID: &str = "mirror_sync_site_id";
    pub const INSERTED_ID: &str = "mirror_sync_inserted_id";

    pub const ALL: [&str; 4] = [IS_SYNCED, LAST_SYNC, SITE_ID, INSERTED_ID];
}

/// A database + collection pair on the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    pub database: String,
    pub name: String,
}

impl CollectionRef {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self { database: database.into(), name: name.into() }
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.name)
    }
}

/// Result of an upsert against the document store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    /// Documents matched by the filter (0 when inserted)
    pub matched: u64,
    /// Generated id, only when the upsert inserted a new document
    pub upserted_id: Option<DocumentId>,
}

/// Document store driver capability.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Update-or-insert the first document matching `filter`, applying
    /// `update` as a field-level `$set`.
    async fn upsert(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        update: &Document,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Remove at most one matching document. Returns the number removed.
    async fn delete_one(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError>;

    /// Remove every matching document. Returns the number removed.
    async fn delete_many(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError>;
}

/// Connects a document store by uri.
#[async_trait]
pub trait DocumentStoreConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<std::sync::Arc<dyn DocumentStore>, StoreError>;
}

/// Per-entity replication status kept in the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncMarker {
    pub is_synced: bool,
    pub last_sync_time: Option<i64>,
    pub sync_site_id: Option<TenantId>,
    pub inserted_document_id: Option<DocumentId>,
}

impl SyncMarker {
    /// Absent or empty document id means the entity was never confirmed.
    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.inserted_document_id.as_deref().map_or(true, str::is_empty)
    }
}

#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Optimistic flags written at enqueue time.
    async fn mark_enqueued(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        entity_id: u64,
        synced_at: i64,
    ) -> Result<(), StoreError>;

    /// Drop the enqueue flags of an entity being deleted.
    async fn clear_marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<(), StoreError>;

    /// Record the document id returned by an inserting upsert.
    async fn record_document_id(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        entity_id: u64,
        document_id: &str,
    ) -> Result<(), StoreError>;

    async fn marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<Option<SyncMarker>, StoreError>;
}

/// Which entities a reconciliation scan looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    ContentItems { types: Vec<String>, statuses: Vec<String> },
    Terms { taxonomies: Vec<String> },
    Users,
}

impl ScanScope {
    pub fn kind(&self) -> EntityKind {
        match self {
            ScanScope::ContentItems { .. } => EntityKind::ContentItem,
            ScanScope::Terms { .. } => EntityKind::TaxonomyTerm,
            ScanScope::Users => EntityKind::User,
        }
    }
}

/// One page of entities lacking a confirmed document id.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub entities: Vec<Entity>,
    /// Total matching entities, independent of the page limit
    pub total_found: u64,
}

/// Read-only view of the relational store used by the scanner.
#[async_trait]
pub trait RelationalSource: Send + Sync {
    async fn find_unsynced(&self, tenant: TenantId, scope: &ScanScope, limit: usize) -> Result<ScanPage, StoreError>;

    /// All field rows (`key`, `value`) of an entity, in storage order.
    async fn field_rows(&self, tenant: TenantId, kind: EntityKind, owner_id: u64) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Process-wide named values read by external dashboards.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn set_counter(&self, tenant: TenantId, name: &str, value: u64) -> Result<(), StoreError>;
    async fn counter(&self, tenant: TenantId, name: &str) -> Result<Option<u64>, StoreError>;
}
