// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! End-of-request flush.
//!
//! Drains an [`EntityBuffer`] through four fixed stages:
//!
//! ```text
//! entity upserts → entity deletes → field upserts → field deletes
//! ```
//!
//! Within a stage, kinds run in [`EntityKind::ENTITIES`] / [`EntityKind::FIELDS`]
//! order and each kind's queue is replayed tenant by tenant under that
//! tenant's context. Deletes run after upserts, so a key both updated and
//! deleted in one cycle ends up deleted.
//!
//! A sink error never stops other tenants, kinds or stages. What it does to
//! the rest of its own tenant batch depends on the [`FailurePolicy`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::batching::{EntityBuffer, TenantQueue};
use crate::entity::{Document, EntityKind, MutationRecord, TableNamer, TenantId};
use crate::metrics;
use crate::storage::traits::{CollectionRef, MarkerStore, StoreError};
use crate::tenant::{TenantContext, TenantIterator};

use super::sink::ReplicationSink;
use super::types::{FailurePolicy, FlushError, FlushReport, Stage, StageCounts};

/// Per tenant-batch result before it is folded into the report
#[derive(Default)]
struct BatchOutcome {
    counts: StageCounts,
    errors: Vec<FlushError>,
}

#[derive(Clone)]
pub struct FlushCoordinator {
    sink: Arc<ReplicationSink>,
    tenants: Arc<dyn TenantContext>,
    markers: Arc<dyn MarkerStore>,
    namer: TableNamer,
    multi_tenant: bool,
    policy: FailurePolicy,
}

impl FlushCoordinator {
    pub fn new(
        sink: Arc<ReplicationSink>,
        tenants: Arc<dyn TenantContext>,
        markers: Arc<dyn MarkerStore>,
        namer: TableNamer,
        multi_tenant: bool,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            sink,
            tenants,
            markers,
            namer,
            multi_tenant,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Run one flush cycle, consuming the buffer.
    #[tracing::instrument(skip_all, fields(records = buffer.len()))]
    pub async fn flush(&self, mut buffer: EntityBuffer) -> FlushReport {
        let start = Instant::now();
        let records = buffer.len();
        let mut report = FlushReport::default();

        if records == 0 {
            return report;
        }

        for stage in Stage::ALL {
            for kind in stage.kinds() {
                let queue = buffer.drain(*kind, stage.op());
                if queue.is_empty() {
                    continue;
                }
                self.run_stage(stage, *kind, queue, &mut report).await;
            }
        }

        report.duration = start.elapsed();
        metrics::record_flush_duration(report.duration);
        metrics::record_flush_records(records);

        let totals = report.totals();
        if report.errors.is_empty() {
            debug!(records, duration_ms = report.duration.as_millis() as u64, "Flush complete");
        } else {
            info!(
                records,
                succeeded = totals.succeeded,
                failed = totals.failed,
                skipped = totals.skipped,
                "Flush completed with errors"
            );
        }
        report
    }

    async fn run_stage(&self, stage: Stage, kind: EntityKind, queue: TenantQueue, report: &mut FlushReport) {
        let iterator = TenantIterator::new(self.tenants.as_ref(), self.multi_tenant);
        let visits = iterator
            .for_each(queue, move |tenant, records| self.apply_batch(stage, kind, tenant, records))
            .await;

        for visit in visits {
            match visit.outcome {
                Ok(outcome) => {
                    report.record(stage, kind, outcome.counts);
                    report.errors.extend(outcome.errors);
                }
                Err(e) => {
                    report.record(stage, kind, StageCounts { skipped: visit.records, ..Default::default() });
                    report.errors.push(FlushError {
                        stage,
                        kind,
                        tenant_id: visit.tenant_id,
                        filter: Document::new(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn apply_batch(&self, stage: Stage, kind: EntityKind, tenant: TenantId, records: Vec<MutationRecord>) -> BatchOutcome {
        // Resolved after the switch: the active tenant decides the table scope
        let collection = self.sink.collection(self.namer.name(kind, self.tenants.current()));
        let total = records.len();
        let mut outcome = BatchOutcome::default();

        for (index, record) in records.iter().enumerate() {
            outcome.counts.attempted += 1;
            match self.apply_record(stage, &collection, record).await {
                Ok(()) => outcome.counts.succeeded += 1,
                Err(e) => {
                    outcome.counts.failed += 1;
                    warn!(%stage, %kind, tenant, key = %record.key, error = %e, "Sink write failed");
                    outcome.errors.push(FlushError {
                        stage,
                        kind,
                        tenant_id: tenant,
                        filter: record.filter(),
                        message: e.to_string(),
                    });

                    if self.policy == FailurePolicy::AbortTenantBatch {
                        outcome.counts.skipped = total - index - 1;
                        break;
                    }
                }
            }
        }
        outcome
    }

    async fn apply_record(&self, stage: Stage, collection: &CollectionRef, record: &MutationRecord) -> Result<(), StoreError> {
        let filter = record.filter();
        match stage {
            Stage::EntityUpserts | Stage::FieldUpserts => {
                let empty = Document::new();
                let document = record.payload.as_ref().unwrap_or(&empty);
                let inserted = self.sink.upsert(record.kind, collection, &filter, document).await?;

                if let (Some(document_id), true, Some(entity_id)) =
                    (inserted, record.kind.has_sync_marker(), record.key.entity_id())
                {
                    if let Err(e) = self
                        .markers
                        .record_document_id(record.tenant_id, record.kind, entity_id, &document_id)
                        .await
                    {
                        // Entity stays visible to the scanner; a later pass re-upserts it
                        warn!(kind = %record.kind, entity_id, error = %e, "Failed to record document id");
                    }
                }
                Ok(())
            }
            Stage::EntityDeletes => self.sink.delete_one(record.kind, collection, &filter).await.map(|_| ()),
            Stage::FieldDeletes => self.sink.delete_many(record.kind, collection, &filter).await.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{NaturalKey, OpClass};
    use crate::storage::content::InMemoryContentStore;
    use crate::storage::memory::InMemoryDocumentStore;
    use crate::tenant::HostTenantContext;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    struct Fixture {
        docs: Arc<InMemoryDocumentStore>,
        content: Arc<InMemoryContentStore>,
        tenants: Arc<HostTenantContext>,
        flusher: FlushCoordinator,
    }

    fn fixture(multi_tenant: bool) -> Fixture {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let content = Arc::new(InMemoryContentStore::new());
        let tenants = Arc::new(HostTenantContext::new(1));
        let flusher = FlushCoordinator::new(
            Arc::new(ReplicationSink::new(docs.clone(), "wordpress")),
            tenants.clone(),
            content.clone(),
            TableNamer::new("wp_", 1),
            multi_tenant,
            FailurePolicy::AbortTenantBatch,
        );
        Fixture { docs, content, tenants, flusher }
    }

    #[tokio::test]
    async fn test_empty_buffer_is_noop() {
        let f = fixture(false);
        let report = f.flusher.flush(EntityBuffer::new()).await;
        assert!(report.is_empty());
        assert!(f.docs.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_records_document_id() {
        let f = fixture(false);
        let mut buffer = EntityBuffer::new();
        buffer.enqueue_upsert(EntityKind::ContentItem, 1, NaturalKey::Id(42), doc(json!({"title": "A"})));

        let report = f.flusher.flush(buffer).await;

        assert!(report.is_success());
        let posts = CollectionRef::new("wordpress", "wp_posts");
        let stored = f.docs.find(&posts, &doc(json!({"ID": 42})));
        assert_eq!(stored.len(), 1);
        let marker = f.content.marker(1, EntityKind::ContentItem, 42).await.unwrap().unwrap();
        assert_eq!(marker.inserted_document_id.as_deref(), stored[0]["_id"].as_str());
    }

    #[tokio::test]
    async fn test_delete_after_upsert_wins() {
        let f = fixture(false);
        let mut buffer = EntityBuffer::new();
        // Delete enqueued first: stage order still applies it last
        buffer.enqueue_delete(EntityKind::ContentItem, 1, NaturalKey::Id(7));
        buffer.enqueue_upsert(EntityKind::ContentItem, 1, NaturalKey::Id(7), doc(json!({"title": "x"})));

        let report = f.flusher.flush(buffer).await;

        assert_eq!(report.stages_run(), vec![Stage::EntityUpserts, Stage::EntityDeletes]);
        assert_eq!(f.docs.len(&CollectionRef::new("wordpress", "wp_posts")), 0);
    }

    #[tokio::test]
    async fn test_field_records_have_no_marker() {
        let f = fixture(false);
        let mut buffer = EntityBuffer::new();
        buffer.enqueue_upsert(
            EntityKind::ContentItemField,
            1,
            NaturalKey::Field { owner_id: 3, field_key: "color".into() },
            doc(json!({"meta_value": "red"})),
        );

        f.flusher.flush(buffer).await;

        assert_eq!(f.docs.len(&CollectionRef::new("wordpress", "wp_postmeta")), 1);
        assert!(f.content.marker(1, EntityKind::ContentItem, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multi_tenant_uses_tenant_collections() {
        let f = fixture(true);
        let mut buffer = EntityBuffer::new();
        buffer.enqueue_upsert(EntityKind::ContentItem, 1, NaturalKey::Id(1), Document::new());
        buffer.enqueue_upsert(EntityKind::ContentItem, 2, NaturalKey::Id(1), Document::new());
        buffer.enqueue_upsert(EntityKind::User, 2, NaturalKey::Id(9), Document::new());

        let report = f.flusher.flush(buffer).await;

        assert!(report.is_success());
        assert_eq!(f.docs.len(&CollectionRef::new("wordpress", "wp_posts")), 1);
        assert_eq!(f.docs.len(&CollectionRef::new("wordpress", "wp_2_posts")), 1);
        assert_eq!(f.docs.len(&CollectionRef::new("wordpress", "wp_users")), 1);
        assert_eq!(f.tenants.current(), 1);
        assert_eq!(f.tenants.switch_count(), 3);
    }

    #[tokio::test]
    async fn test_buffer_is_consumed() {
        let f = fixture(false);
        let mut buffer = EntityBuffer::new();
        buffer.enqueue_upsert(EntityKind::Setting, 1, NaturalKey::Name("blogname".into()), Document::new());
        assert!(buffer.pending(EntityKind::Setting, OpClass::Upsert).is_some());

        let report = f.flusher.flush(buffer).await;
        assert_eq!(report.succeeded(Stage::EntityUpserts, EntityKind::Setting), 1);
    }
}
