// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process relational content store.
//!
//! Holds entities, their field rows, SyncMarkers and named counters in
//! memory. Network-global kinds (users, sites) are stored once, outside any
//! tenant. Serves as the scanner's source and as the marker/counter sink when
//! no SQL database is attached.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::entity::{Classification, Entity, EntityKind, TenantId};
use super::traits::{
    CounterStore, MarkerStore, RelationalSource, ScanPage, ScanScope, StoreError, SyncMarker,
};

type RowKey = (TenantId, EntityKind, u64);

#[derive(Default)]
struct Tables {
    entities: BTreeMap<RowKey, Entity>,
    fields: BTreeMap<RowKey, Vec<(String, Value)>>,
    markers: HashMap<RowKey, SyncMarker>,
    counters: HashMap<(TenantId, String), u64>,
}

#[derive(Default)]
pub struct InMemoryContentStore {
    tables: RwLock<Tables>,
}

/// Tenant a row of `kind` actually lives under.
fn scoped(kind: EntityKind, tenant: TenantId) -> TenantId {
    if kind.is_network_global() {
        0
    } else {
        tenant
    }
}

fn row_key(tenant: TenantId, kind: EntityKind, id: u64) -> RowKey {
    let owner = kind.owner_kind();
    (scoped(owner, tenant), owner, id)
}

fn in_scope(entity: &Entity, scope: &ScanScope) -> bool {
    match (scope, &entity.classification) {
        (ScanScope::ContentItems { types, statuses }, Classification::ContentItem { post_type, status }) => {
            types.contains(post_type) && statuses.contains(status)
        }
        (ScanScope::Terms { taxonomies }, Classification::Term { taxonomy }) => taxonomies.contains(taxonomy),
        (ScanScope::Users, _) => true,
        _ => false,
    }
}

impl InMemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity row. Entities without a numeric id are ignored.
    pub fn insert_entity(&self, tenant: TenantId, kind: EntityKind, entity: Entity) {
        if let Some(id) = entity.id() {
            self.tables.write().entities.insert(row_key(tenant, kind, id), entity);
        }
    }

    /// Insert or replace a field row of the entity `owner_id`.
    pub fn set_field(&self, tenant: TenantId, kind: EntityKind, owner_id: u64, key: &str, value: Value) {
        let mut tables = self.tables.write();
        let rows = tables.fields.entry(row_key(tenant, kind, owner_id)).or_default();
        match rows.iter_mut().find(|(k, _)| k == key) {
            Some(row) => row.1 = value,
            None => rows.push((key.to_string(), value)),
        }
    }

    #[must_use]
    pub fn entity_count(&self, tenant: TenantId, kind: EntityKind) -> usize {
        let tenant = scoped(kind, tenant);
        self.tables
            .read()
            .entities
            .keys()
            .filter(|(t, k, _)| *t == tenant && *k == kind)
            .count()
    }
}

#[async_trait]
impl RelationalSource for InMemoryContentStore {
    async fn find_unsynced(&self, tenant: TenantId, scope: &ScanScope, limit: usize) -> Result<ScanPage, StoreError> {
        let kind = scope.kind();
        let tenant = scoped(kind, tenant);
        let tables = self.tables.read();

        let mut page = ScanPage::default();
        for (key, entity) in tables.entities.iter() {
            if key.0 != tenant || key.1 != kind || !in_scope(entity, scope) {
                continue;
            }
            let needs_resync = tables.markers.get(key).map_or(true, SyncMarker::needs_resync);
            if !needs_resync {
                continue;
            }
            page.total_found += 1;
            if page.entities.len() < limit {
                page.entities.push(entity.clone());
            }
        }
        Ok(page)
    }

    async fn field_rows(&self, tenant: TenantId, kind: EntityKind, owner_id: u64) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .tables
            .read()
            .fields
            .get(&row_key(tenant, kind, owner_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MarkerStore for InMemoryContentStore {
    async fn mark_enqueued(&self, tenant: TenantId, kind: EntityKind, entity_id: u64, synced_at: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let marker = tables.markers.entry(row_key(tenant, kind, entity_id)).or_default();
        marker.is_synced = true;
        marker.last_sync_time = Some(synced_at);
        marker.sync_site_id = Some(tenant);
        Ok(())
    }

    async fn clear_marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<(), StoreError> {
        self.tables.write().markers.remove(&row_key(tenant, kind, entity_id));
        Ok(())
    }

    async fn record_document_id(
        &self,
        tenant: TenantId,
        kind: EntityKind,
        entity_id: u64,
        document_id: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let marker = tables.markers.entry(row_key(tenant, kind, entity_id)).or_default();
        marker.inserted_document_id = Some(document_id.to_string());
        Ok(())
    }

    async fn marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<Option<SyncMarker>, StoreError> {
        Ok(self.tables.read().markers.get(&row_key(tenant, kind, entity_id)).cloned())
    }
}

#[async_trait]
impl CounterStore for InMemoryContentStore {
    async fn set_counter(&self, tenant: TenantId, name: &str, value: u64) -> Result<(), StoreError> {
        self.tables.write().counters.insert((tenant, name.to_string()), value);
        Ok(())
    }

    async fn counter(&self, tenant: TenantId, name: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.tables.read().counters.get(&(tenant, name.to_string())).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Document;
    use serde_json::json;

    fn post(id: u64, post_type: &str, status: &str) -> Entity {
        Entity::post(id, post_type, status, Document::new())
    }

    fn posts_scope() -> ScanScope {
        ScanScope::ContentItems {
            types: vec!["post".into()],
            statuses: vec!["publish".into()],
        }
    }

    #[tokio::test]
    async fn test_find_unsynced_filters_by_scope() {
        let store = InMemoryContentStore::new();
        store.insert_entity(1, EntityKind::ContentItem, post(1, "post", "publish"));
        store.insert_entity(1, EntityKind::ContentItem, post(2, "post", "draft"));
        store.insert_entity(1, EntityKind::ContentItem, post(3, "page", "publish"));

        let page = store.find_unsynced(1, &posts_scope(), 10).await.unwrap();
        assert_eq!(page.total_found, 1);
        assert_eq!(page.entities[0].id(), Some(1));
    }

    #[tokio::test]
    async fn test_find_unsynced_skips_confirmed() {
        let store = InMemoryContentStore::new();
        for id in 1..=3 {
            store.insert_entity(1, EntityKind::ContentItem, post(id, "post", "publish"));
        }
        store.record_document_id(1, EntityKind::ContentItem, 2, "abc").await.unwrap();
        // Enqueue flags alone do not count as synced
        store.mark_enqueued(1, EntityKind::ContentItem, 3, 100).await.unwrap();

        let page = store.find_unsynced(1, &posts_scope(), 10).await.unwrap();
        let ids: Vec<_> = page.entities.iter().filter_map(Entity::id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_page_limit_keeps_total() {
        let store = InMemoryContentStore::new();
        for id in 1..=5 {
            store.insert_entity(1, EntityKind::ContentItem, post(id, "post", "publish"));
        }

        let page = store.find_unsynced(1, &posts_scope(), 2).await.unwrap();
        assert_eq!(page.entities.len(), 2);
        assert_eq!(page.total_found, 5);
    }

    #[tokio::test]
    async fn test_tenants_are_separate_except_global_kinds() {
        let store = InMemoryContentStore::new();
        store.insert_entity(1, EntityKind::ContentItem, post(1, "post", "publish"));
        store.insert_entity(2, EntityKind::User, Entity::user(7, Document::new()));

        assert!(store.find_unsynced(2, &posts_scope(), 10).await.unwrap().entities.is_empty());
        assert_eq!(store.find_unsynced(1, &ScanScope::Users, 10).await.unwrap().total_found, 1);
        assert_eq!(store.entity_count(5, EntityKind::User), 1);
    }

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let store = InMemoryContentStore::new();
        store.mark_enqueued(3, EntityKind::TaxonomyTerm, 9, 1_700_000_000).await.unwrap();
        store.record_document_id(3, EntityKind::TaxonomyTerm, 9, "doc-9").await.unwrap();

        let marker = store.marker(3, EntityKind::TaxonomyTerm, 9).await.unwrap().unwrap();
        assert!(marker.is_synced);
        assert_eq!(marker.sync_site_id, Some(3));
        assert_eq!(marker.last_sync_time, Some(1_700_000_000));
        assert!(!marker.needs_resync());

        store.clear_marker(3, EntityKind::TaxonomyTerm, 9).await.unwrap();
        assert!(store.marker(3, EntityKind::TaxonomyTerm, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_field_rows_accept_field_or_owner_kind() {
        let store = InMemoryContentStore::new();
        store.set_field(1, EntityKind::ContentItem, 4, "color", json!("red"));
        store.set_field(1, EntityKind::ContentItemField, 4, "size", json!("L"));
        store.set_field(1, EntityKind::ContentItem, 4, "color", json!("blue"));

        let rows = store.field_rows(1, EntityKind::ContentItemField, 4).await.unwrap();
        assert_eq!(rows, vec![("color".to_string(), json!("blue")), ("size".to_string(), json!("L"))]);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = InMemoryContentStore::new();
        assert_eq!(store.counter(1, "sync_untracked_posts").await.unwrap(), None);
        store.set_counter(1, "sync_untracked_posts", 4).await.unwrap();
        assert_eq!(store.counter(1, "sync_untracked_posts").await.unwrap(), Some(4));
    }
}
