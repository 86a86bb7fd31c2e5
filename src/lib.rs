// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Mirror Sync
//!
//! Change-data-capture from a WordPress-style relational store into a
//! document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Mutation notifications                     │
//! │  • saved / deleting / field updated / field deleted        │
//! │  • posts, terms, users, options, sites                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (EntityReplicator<K>: eligibility)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Entity Buffer                          │
//! │  • One per request, owned by the caller                    │
//! │  • (kind, op) → tenant → ordered records                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (end of request)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Flush Coordinator                        │
//! │  • entity upserts → entity deletes → field upserts →       │
//! │    field deletes                                           │
//! │  • each tenant's batch under that tenant's context         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Replication Sink                         │
//! │  • upsert by natural key, delete_one, delete_many          │
//! │  • new document ids written back as SyncMarkers            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`ReconciliationScanner`](reconcile::ReconciliationScanner), driven by
//! cron, replays entities whose SyncMarker never got a document id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_sync::{Collaborators, DriverRegistry, Entity, EntityKind, HostTenantContext,
//!     InMemoryContentStore, InMemoryDocumentStore, MirrorConfig, MirrorSync, MutationEvent,
//!     StaticSettings};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = StaticSettings::new();
//!     settings.set("mirror-sync-connection-uri", json!("memory://local"));
//!     settings.set("mirror-sync-object-types", json!(["post"]));
//!     settings.set("mirror-sync-object-status", json!(["publish"]));
//!
//!     let collaborators = Collaborators::new(
//!         Arc::new(settings),
//!         Arc::new(HostTenantContext::new(1)),
//!         Arc::new(InMemoryContentStore::new()),
//!     );
//!     let drivers = DriverRegistry::with_memory(Arc::new(InMemoryDocumentStore::new()));
//!     let mut engine = MirrorSync::new(MirrorConfig::default(), collaborators, drivers);
//!     engine.start().await.expect("Failed to start");
//!
//!     let mut buffer = engine.begin_request();
//!     let post = Entity::post(42, "post", "publish", json!({"post_title": "A"}).as_object().cloned().unwrap());
//!     engine
//!         .dispatch(&mut buffer, MutationEvent::EntitySaved { kind: EntityKind::ContentItem, entity: post })
//!         .await
//!         .expect("dispatch");
//!     let report = engine.finish_request(buffer).await.expect("flush");
//!     assert!(report.is_success());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`MirrorSync`] engine, flush stages and sink
//! - [`batching`]: The per-request entity buffer
//! - [`replicator`]: One generic replicator per entity kind
//! - [`reconcile`]: Scanner and cron hooks
//! - [`storage`]: Collaborator traits and backends (memory, SQL)
//! - [`tenant`]: Scoped tenant context switching
//! - [`settings`] / [`config`]: Host settings and engine configuration
//! - [`resilience`]: Retry for startup connections

pub mod batching;
pub mod config;
pub mod coordinator;
pub mod eligibility;
pub mod entity;
pub mod metrics;
pub mod reconcile;
pub mod replicator;
pub mod resilience;
pub mod settings;
pub mod storage;
pub mod tenant;

pub use batching::{EntityBuffer, TenantBatch, TenantQueue};
pub use config::{MirrorConfig, Overrides};
pub use coordinator::{
    Collaborators, EngineState, FailurePolicy, FlushCoordinator, FlushError, FlushReport, MirrorSync,
    MutationEvent, ReplicationSink, Stage, StageCounts, SyncError,
};
pub use eligibility::{AllowLists, EligibilityFilter};
pub use entity::{
    Classification, Document, DocumentId, Entity, EntityKind, MutationRecord, NaturalKey, OpClass, TableNamer,
    TenantId,
};
pub use reconcile::{CronRegistrar, CronTable, ReconciliationScanner, ScanReport};
pub use replicator::{Disposition, EntityReplicator, Replicators};
pub use resilience::retry::RetryConfig;
pub use settings::{ResolvedSettings, SettingsStore, StaticSettings};
pub use storage::content::InMemoryContentStore;
pub use storage::memory::InMemoryDocumentStore;
pub use storage::registry::DriverRegistry;
pub use storage::sql::SqlContentStore;
pub use storage::traits::{CollectionRef, DocumentStore, StoreError, SyncMarker};
pub use tenant::{ContextError, HostTenantContext, TenantContext};
pub use metrics::LatencyTimer;
