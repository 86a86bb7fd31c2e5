// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-to-end replication flows through the engine facade.
//!
//! Everything runs in-process: the document store is served from
//! `memory://`, the relational side is an `InMemoryContentStore`.
//!
//! ```bash
//! cargo test --test replication
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mirror_sync::reconcile::CronRegistrar;
use mirror_sync::settings::keys;
use mirror_sync::storage::memory::MemoryConnector;
use mirror_sync::storage::traits::{CounterStore, DocumentStoreConnector, MarkerStore, UpsertOutcome};
use mirror_sync::{
    CollectionRef, Collaborators, Disposition, Document, DocumentStore, DriverRegistry, EngineState, Entity,
    EntityKind, HostTenantContext, InMemoryContentStore, InMemoryDocumentStore, MirrorConfig, MirrorSync,
    MutationEvent, NaturalKey, RetryConfig, Stage, StaticSettings, StoreError, TenantContext,
};

// =============================================================================
// Harness
// =============================================================================

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn posts() -> CollectionRef {
    CollectionRef::new("wordpress", "wp_posts")
}

fn post(id: u64, title: &str) -> Entity {
    Entity::post(id, "post", "publish", doc(json!({"ID": id, "post_title": title})))
}

fn saved(kind: EntityKind, entity: Entity) -> MutationEvent {
    MutationEvent::EntitySaved { kind, entity }
}

fn deleting(kind: EntityKind, entity: Entity) -> MutationEvent {
    MutationEvent::EntityDeleting { kind, entity }
}

/// Settings with posts (post/publish) eligible and no taxonomies.
fn default_settings() -> StaticSettings {
    let settings = StaticSettings::new();
    settings.set(keys::CONNECTION_URI, json!("memory://local"));
    settings.set(keys::OBJECT_TYPES, json!(["post", "page"]));
    settings.set(keys::OBJECT_STATUS, json!(["publish"]));
    settings
}

struct Harness {
    engine: MirrorSync,
    docs: Arc<InMemoryDocumentStore>,
    content: Arc<InMemoryContentStore>,
    tenants: Arc<HostTenantContext>,
}

fn harness_with(settings: StaticSettings, config: MirrorConfig, tenants: HostTenantContext) -> Harness {
    let docs = Arc::new(InMemoryDocumentStore::new());
    let content = Arc::new(InMemoryContentStore::new());
    let tenants = Arc::new(tenants);
    let collaborators = Collaborators::new(Arc::new(settings), tenants.clone(), content.clone());
    let engine = MirrorSync::new(config, collaborators, DriverRegistry::with_memory(docs.clone()))
        .with_connect_retry(RetryConfig::immediate())
        .with_cron_tick(Duration::from_millis(10));
    Harness { engine, docs, content, tenants }
}

async fn started(settings: StaticSettings) -> Harness {
    let mut h = harness_with(settings, MirrorConfig::default(), HostTenantContext::new(1));
    h.engine.start().await.expect("engine should start");
    h
}

// =============================================================================
// Idempotence & stage ordering
// =============================================================================

#[tokio::test]
async fn test_repeated_upsert_converges_to_one_document() {
    let h = started(default_settings()).await;

    for _ in 0..2 {
        let mut buffer = h.engine.begin_request();
        h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(42, "A"))).await.unwrap();
        let report = h.engine.finish_request(buffer).await.unwrap();
        assert!(report.is_success());
    }

    let stored = h.docs.find(&posts(), &doc(json!({"ID": 42})));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["post_title"], "A");
}

#[tokio::test]
async fn test_update_then_delete_in_one_request_leaves_deletion() {
    let h = started(default_settings()).await;

    let mut buffer = h.engine.begin_request();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(7, "first"))).await.unwrap();
    h.engine.finish_request(buffer).await.unwrap();
    assert_eq!(h.docs.len(&posts()), 1);

    let mut buffer = h.engine.begin_request();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(7, "second"))).await.unwrap();
    h.engine.dispatch(&mut buffer, deleting(EntityKind::ContentItem, post(7, "second"))).await.unwrap();
    let report = h.engine.finish_request(buffer).await.unwrap();

    assert_eq!(report.stages_run(), vec![Stage::EntityUpserts, Stage::EntityDeletes]);
    assert_eq!(h.docs.len(&posts()), 0);
    assert!(h.content.marker(1, EntityKind::ContentItem, 7).await.unwrap().is_none());
}

#[tokio::test]
async fn test_field_rows_follow_their_entity() {
    let h = started(default_settings()).await;

    let mut buffer = h.engine.begin_request();
    h.engine
        .dispatch(
            &mut buffer,
            MutationEvent::FieldUpdated {
                kind: EntityKind::ContentItemField,
                field_id: 11,
                owner_id: 5,
                key: "color".into(),
                value: json!("red"),
            },
        )
        .await
        .unwrap();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(5, "owner"))).await.unwrap();
    let report = h.engine.finish_request(buffer).await.unwrap();

    assert_eq!(report.stages_run(), vec![Stage::EntityUpserts, Stage::FieldUpserts]);
    let meta = h.docs.find(
        &CollectionRef::new("wordpress", "wp_postmeta"),
        &doc(json!({"post_id": 5, "meta_key": "color"})),
    );
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0]["meta_value"], "red");
}

// =============================================================================
// Eligibility
// =============================================================================

#[tokio::test]
async fn test_empty_allow_list_is_fail_closed() {
    let h = started(default_settings()).await;
    let mut buffer = h.engine.begin_request();

    for id in 0..5 {
        let term = Entity::term(id, "category", Document::new());
        let disposition = h.engine.dispatch(&mut buffer, saved(EntityKind::TaxonomyTerm, term)).await.unwrap();
        assert_eq!(disposition, Disposition::Rejected);
    }
    let draft = Entity::post(9, "post", "draft", Document::new());
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, draft)).await.unwrap();

    assert!(buffer.is_empty());
    assert!(h.engine.finish_request(buffer).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleting_ineligible_entity_is_ignored() {
    let h = started(default_settings()).await;
    let mut buffer = h.engine.begin_request();

    let revision = Entity::post(3, "revision", "inherit", Document::new());
    let disposition = h.engine.dispatch(&mut buffer, deleting(EntityKind::ContentItem, revision)).await.unwrap();

    assert_eq!(disposition, Disposition::Rejected);
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn test_marker_field_keys_are_never_replicated() {
    let h = started(default_settings()).await;
    let mut buffer = h.engine.begin_request();

    let disposition = h
        .engine
        .dispatch(
            &mut buffer,
            MutationEvent::FieldUpdated {
                kind: EntityKind::ContentItemField,
                field_id: 1,
                owner_id: 1,
                key: "mirror_sync_inserted_id".into(),
                value: json!("abc"),
            },
        )
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Rejected);
    assert!(buffer.is_empty());
}

// =============================================================================
// Tenants
// =============================================================================

#[tokio::test]
async fn test_tenant_batches_land_in_their_own_collections() {
    let config = MirrorConfig { multi_tenant: true, ..Default::default() };
    let settings = StaticSettings::new();
    settings.set("_network_options_mirror-sync-connection-uri", json!("memory://local"));
    settings.set("_network_options_mirror-sync-object-types", json!(["post"]));
    settings.set("_network_options_mirror-sync-object-status", json!(["publish"]));
    let mut h = harness_with(settings, config, HostTenantContext::with_tenants(1, [2]));
    h.engine.start().await.unwrap();

    let mut buffer = h.engine.begin_request();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(1, "main"))).await.unwrap();
    h.tenants.switch_to(2).unwrap();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(1, "second"))).await.unwrap();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(2, "second"))).await.unwrap();
    h.tenants.restore(1);

    let report = h.engine.finish_request(buffer).await.unwrap();

    assert!(report.is_success());
    let main = h.docs.find(&posts(), &doc(json!({"ID": 1})));
    assert_eq!(main.len(), 1);
    assert_eq!(main[0]["post_title"], "main");
    assert_eq!(h.docs.len(&posts()), 1);
    assert_eq!(h.docs.len(&CollectionRef::new("wordpress", "wp_2_posts")), 2);
    assert_eq!(h.tenants.current(), 1);
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_scan_converges_and_persists_untracked_count() {
    let mut config = MirrorConfig::default();
    config.scan_page_size = 2;
    let mut h = harness_with(default_settings(), config, HostTenantContext::new(1));
    h.engine.start().await.unwrap();
    for id in 1..=5 {
        h.content.insert_entity(1, EntityKind::ContentItem, post(id, "seeded"));
    }

    let first = h.engine.run_scan(EntityKind::ContentItem).await.unwrap();
    assert_eq!(first.found, 5);
    assert_eq!(first.upserted, 2);
    assert_eq!(first.untracked, 3);
    assert_eq!(h.content.counter(1, "sync_untracked_posts").await.unwrap(), Some(3));

    h.engine.run_scan(EntityKind::ContentItem).await.unwrap();
    let last = h.engine.run_scan(EntityKind::ContentItem).await.unwrap();
    assert_eq!(last.untracked, 0);
    assert_eq!(h.docs.len(&posts()), 5);
    assert_eq!(h.content.counter(1, "sync_untracked_posts").await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_live_save_and_scan_race_converges() {
    let h = started(default_settings()).await;
    h.content.insert_entity(1, EntityKind::ContentItem, post(8, "seeded"));

    // A live save is in flight while the scanner picks up the same entity
    let mut buffer = h.engine.begin_request();
    h.engine.dispatch(&mut buffer, saved(EntityKind::ContentItem, post(8, "live"))).await.unwrap();
    h.engine.run_scan(EntityKind::ContentItem).await.unwrap();
    h.engine.finish_request(buffer).await.unwrap();

    let stored = h.docs.find(&posts(), &doc(json!({"ID": 8})));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["post_title"], "live");
}

/// Memory store whose upserts take a while, to hold a flush mid-tenant.
struct SlowStore {
    inner: Arc<InMemoryDocumentStore>,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowStore {
    async fn upsert(&self, collection: &CollectionRef, filter: &Document, update: &Document) -> Result<UpsertOutcome, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(collection, filter, update).await
    }

    async fn delete_one(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        self.inner.delete_many(collection, filter).await
    }
}

struct SlowConnector(Arc<SlowStore>);

#[async_trait]
impl DocumentStoreConnector for SlowConnector {
    async fn connect(&self, _uri: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_overlapping_live_flush_and_scan_keep_tenants_apart() {
    let docs = Arc::new(InMemoryDocumentStore::new());
    let store = Arc::new(SlowStore { inner: docs.clone(), delay: Duration::from_millis(20) });
    let mut drivers = DriverRegistry::new();
    drivers.register("slow", Arc::new(SlowConnector(store)));

    let settings = StaticSettings::new();
    settings.set("_network_options_mirror-sync-connection-uri", json!("slow://"));
    settings.set("_network_options_mirror-sync-object-types", json!(["post"]));
    settings.set("_network_options_mirror-sync-object-status", json!(["publish"]));
    let tenants = Arc::new(HostTenantContext::with_tenants(1, [2, 3]));
    let content = Arc::new(InMemoryContentStore::new());
    content.insert_entity(1, EntityKind::ContentItem, post(20, "main"));
    content.insert_entity(1, EntityKind::ContentItem, post(21, "main"));
    // Left for site 3's own scan
    content.insert_entity(3, EntityKind::ContentItem, post(30, "other site"));

    let config = MirrorConfig { multi_tenant: true, ..Default::default() };
    let collaborators = Collaborators::new(Arc::new(settings), tenants.clone(), content.clone());
    let mut engine = MirrorSync::new(config, collaborators, drivers).with_connect_retry(RetryConfig::immediate());
    engine.start().await.unwrap();

    // Two requests captured on other sites
    let mut on_site_2 = engine.begin_request();
    let mut on_site_3 = engine.begin_request();
    tenants.switch_to(2).unwrap();
    engine.dispatch(&mut on_site_2, saved(EntityKind::ContentItem, post(5, "site 2"))).await.unwrap();
    tenants.switch_to(3).unwrap();
    engine.dispatch(&mut on_site_3, saved(EntityKind::ContentItem, post(6, "site 3"))).await.unwrap();
    tenants.restore(1);

    // Both flushes and a main-site scan overlap while upserts are in flight
    let delayed_flush = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.finish_request(on_site_3).await
    };
    let delayed_scan = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.run_scan(EntityKind::ContentItem).await
    };
    let (first, second, scan) = tokio::join!(engine.finish_request(on_site_2), delayed_flush, delayed_scan);

    assert!(first.unwrap().is_success());
    assert!(second.unwrap().is_success());
    let scan = scan.unwrap();
    assert_eq!(scan.found, 2);
    assert_eq!(scan.upserted, 2);

    assert_eq!(docs.len(&posts()), 2);
    assert_eq!(docs.find(&CollectionRef::new("wordpress", "wp_2_posts"), &doc(json!({"ID": 5}))).len(), 1);
    assert_eq!(docs.find(&CollectionRef::new("wordpress", "wp_3_posts"), &doc(json!({"ID": 6}))).len(), 1);
    assert!(docs.find(&posts(), &doc(json!({"ID": 5}))).is_empty());
    assert!(docs.find(&CollectionRef::new("wordpress", "wp_3_posts"), &doc(json!({"ID": 30}))).is_empty());
    assert_eq!(tenants.current(), 1);
    assert_eq!(content.counter(1, "sync_untracked_posts").await.unwrap(), Some(0));
}

// =============================================================================
// Write-back of document ids
// =============================================================================

/// Document store that hands out a fixed id on insert and logs every upsert.
struct FixedIdStore {
    inner: InMemoryDocumentStore,
    upserts: Mutex<Vec<(CollectionRef, Document)>>,
}

#[async_trait]
impl DocumentStore for FixedIdStore {
    async fn upsert(
        &self,
        collection: &CollectionRef,
        filter: &Document,
        update: &Document,
    ) -> Result<UpsertOutcome, StoreError> {
        self.upserts.lock().push((collection.clone(), filter.clone()));
        let outcome = self.inner.upsert(collection, filter, update).await?;
        Ok(UpsertOutcome {
            upserted_id: outcome.upserted_id.map(|_| "abc123".to_string()),
            ..outcome
        })
    }

    async fn delete_one(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &CollectionRef, filter: &Document) -> Result<u64, StoreError> {
        self.inner.delete_many(collection, filter).await
    }
}

struct FixedIdConnector(Arc<FixedIdStore>);

#[async_trait]
impl DocumentStoreConnector for FixedIdConnector {
    async fn connect(&self, _uri: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_new_document_id_is_written_back_to_marker() {
    let store = Arc::new(FixedIdStore { inner: InMemoryDocumentStore::new(), upserts: Mutex::new(Vec::new()) });
    let mut drivers = DriverRegistry::new();
    drivers.register("fixed", Arc::new(FixedIdConnector(store.clone())));

    let settings = default_settings();
    settings.set(keys::CONNECTION_URI, json!("fixed://"));
    let content = Arc::new(InMemoryContentStore::new());
    let collaborators = Collaborators::new(Arc::new(settings), Arc::new(HostTenantContext::new(1)), content.clone());
    let mut engine = MirrorSync::new(MirrorConfig::default(), collaborators, drivers);
    engine.start().await.unwrap();

    let mut buffer = engine.begin_request();
    engine
        .dispatch(&mut buffer, saved(EntityKind::ContentItem, Entity::post(42, "post", "publish", doc(json!({"title": "A"})))))
        .await
        .unwrap();
    engine.finish_request(buffer).await.unwrap();

    let upserts = store.upserts.lock().clone();
    assert_eq!(upserts, vec![(posts(), doc(json!({"ID": 42})))]);
    let marker = content.marker(1, EntityKind::ContentItem, 42).await.unwrap().unwrap();
    assert_eq!(marker.inserted_document_id.as_deref(), Some("abc123"));
    assert!(marker.is_synced);
}

// =============================================================================
// Field deletes
// =============================================================================

#[tokio::test]
async fn test_duplicate_field_deletes_remove_every_match() {
    let h = started(default_settings()).await;
    let postmeta = CollectionRef::new("wordpress", "wp_postmeta");
    for meta_id in [1, 2] {
        h.docs
            .upsert(&postmeta, &doc(json!({"post_id": 3, "meta_key": "color", "meta_id": meta_id})), &doc(json!({"meta_value": "red"})))
            .await
            .unwrap();
    }
    assert_eq!(h.docs.len(&postmeta), 2);

    let mut buffer = h.engine.begin_request();
    for field_id in [1, 2] {
        h.engine
            .dispatch(
                &mut buffer,
                MutationEvent::FieldDeleted {
                    kind: EntityKind::ContentItemField,
                    field_id,
                    owner_id: 3,
                    key: "color".into(),
                },
            )
            .await
            .unwrap();
    }
    let report = h.engine.finish_request(buffer).await.unwrap();

    assert_eq!(report.succeeded(Stage::FieldDeletes, EntityKind::ContentItemField), 2);
    assert!(h.docs.find(&postmeta, &NaturalKey::Field { owner_id: 3, field_key: "color".into() }.filter_for(EntityKind::ContentItemField)).is_empty());
}

// =============================================================================
// Cron
// =============================================================================

#[tokio::test]
async fn test_disabling_cron_cancels_pending_hooks() {
    let mut h = harness_with(default_settings(), MirrorConfig::default(), HostTenantContext::new(1));
    let cron = h.engine.cron_table();
    cron.register_interval(CronRegistrar::RECURRENCE, 900).unwrap();
    cron.schedule_event(1_000, Some(CronRegistrar::RECURRENCE), "mirror_sync_post", vec![]).unwrap();
    cron.schedule_event(5_000, None, "mirror_sync_post", vec![json!("page-2")]).unwrap();
    cron.schedule_event(1_000, None, "mirror_sync_user", vec![]).unwrap();

    h.engine.start().await.unwrap();

    assert!(cron.pending().iter().all(|e| !e.hook.starts_with("mirror_sync_")));
    assert!(!cron.is_pending("mirror_sync_post"));
    assert!(!cron.is_pending("mirror_sync_user"));
}

#[tokio::test]
async fn test_enabled_cron_runs_scans() {
    let settings = default_settings();
    settings.set(keys::CRON_ENABLE, json!(["1"]));
    let mut h = harness_with(settings, MirrorConfig::default(), HostTenantContext::new(1));
    h.content.insert_entity(1, EntityKind::ContentItem, post(1, "scheduled"));

    h.engine.start().await.unwrap();
    for hook in ["mirror_sync_post", "mirror_sync_term", "mirror_sync_user"] {
        assert!(h.engine.cron_table().is_pending(hook));
    }

    let mut synced = false;
    for _ in 0..200 {
        if h.docs.len(&posts()) == 1 {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(synced, "cron driver should have replicated the seeded post");

    h.engine.shutdown().await;
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_memory_connector_rejects_other_schemes() {
    let connector = MemoryConnector::new(Arc::new(InMemoryDocumentStore::new()));
    assert!(matches!(connector.connect("mysql://x").await, Err(StoreError::InvalidUri(_))));
}
