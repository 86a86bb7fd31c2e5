// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-request mutation buffer.
//!
//! The [`EntityBuffer`] collects [`MutationRecord`]s while a request runs and
//! hands them to the flush coordinator once, at the end. Records are grouped
//! by (kind, operation class), then by tenant. Tenants keep the order they
//! were first seen in; records keep the order they were enqueued in.
//!
//! Nothing is deduplicated. Enqueueing the same key twice replays it twice,
//! and the idempotent upsert on the sink makes the last copy win.
//!
//! # Example
//!
//! ```
//! use mirror_sync::{EntityBuffer, EntityKind, NaturalKey, OpClass};
//! use serde_json::json;
//!
//! let mut buffer = EntityBuffer::new();
//! let doc = json!({"post_title": "A"}).as_object().cloned().unwrap();
//! buffer.enqueue_upsert(EntityKind::ContentItem, 1, NaturalKey::Id(42), doc);
//! buffer.enqueue_delete(EntityKind::ContentItem, 1, NaturalKey::Id(7));
//!
//! assert_eq!(buffer.len(), 2);
//!
//! let upserts = buffer.drain(EntityKind::ContentItem, OpClass::Upsert);
//! assert_eq!(upserts.len(), 1);
//! assert!(buffer.drain(EntityKind::ContentItem, OpClass::Upsert).is_empty());
//! ```

use std::collections::BTreeMap;

use tracing::trace;

use crate::entity::{Document, EntityKind, MutationRecord, NaturalKey, OpClass, TenantId};
use crate::metrics;

/// One tenant's records for a single (kind, operation class).
#[derive(Debug, Clone, PartialEq)]
pub struct TenantBatch {
    pub tenant_id: TenantId,
    pub records: Vec<MutationRecord>,
}

/// Tenant-ordered sequence of batches, as drained from the buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantQueue {
    batches: Vec<TenantBatch>,
}

impl TenantQueue {
    /// Append to the tenant's sequence, opening it at the tail if unseen.
    pub fn push(&mut self, record: MutationRecord) {
        let tenant_id = record.tenant_id;
        match self.batches.iter_mut().find(|b| b.tenant_id == tenant_id) {
            Some(batch) => batch.records.push(record),
            None => self.batches.push(TenantBatch {
                tenant_id,
                records: vec![record],
            }),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total records across tenants
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(|b| b.records.len()).sum()
    }

    /// Tenant ids in visiting order
    pub fn tenants(&self) -> impl Iterator<Item = TenantId> + '_ {
        self.batches.iter().map(|b| b.tenant_id)
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<&[MutationRecord]> {
        self.batches
            .iter()
            .find(|b| b.tenant_id == tenant_id)
            .map(|b| b.records.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TenantBatch> {
        self.batches.iter()
    }
}

impl IntoIterator for TenantQueue {
    type Item = TenantBatch;
    type IntoIter = std::vec::IntoIter<TenantBatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

/// Caller-owned buffer, one per request.
#[derive(Debug, Default)]
pub struct EntityBuffer {
    queues: BTreeMap<(EntityKind, OpClass), TenantQueue>,
    autosave: bool,
}

impl EntityBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer for an autosave request. Dispatch ignores every notification.
    #[must_use]
    pub fn autosave() -> Self {
        Self {
            queues: BTreeMap::new(),
            autosave: true,
        }
    }

    #[must_use]
    pub fn is_autosave(&self) -> bool {
        self.autosave
    }

    pub fn enqueue_upsert(&mut self, kind: EntityKind, tenant_id: TenantId, key: NaturalKey, payload: Document) {
        self.push(MutationRecord::upsert(kind, tenant_id, key, payload));
    }

    pub fn enqueue_delete(&mut self, kind: EntityKind, tenant_id: TenantId, key: NaturalKey) {
        self.push(MutationRecord::delete(kind, tenant_id, key));
    }

    /// Append a prebuilt record to the tail of its tenant's sequence.
    pub fn push(&mut self, record: MutationRecord) {
        let op = record.op();
        trace!(kind = %record.kind, tenant = record.tenant_id, key = %record.key, op = op.as_str(), "Enqueued");
        metrics::record_enqueued(record.kind, op);
        self.queues.entry((record.kind, op)).or_default().push(record);
    }

    /// Remove and return everything buffered for (kind, op).
    pub fn drain(&mut self, kind: EntityKind, op: OpClass) -> TenantQueue {
        self.queues.remove(&(kind, op)).unwrap_or_default()
    }

    /// Look at a queue without draining it
    pub fn pending(&self, kind: EntityKind, op: OpClass) -> Option<&TenantQueue> {
        self.queues.get(&(kind, op))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(TenantQueue::is_empty)
    }

    /// Total buffered records
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.values().map(TenantQueue::len).sum()
    }

    /// Records buffered for one kind, both operation classes
    #[must_use]
    pub fn len_of(&self, kind: EntityKind) -> usize {
        [OpClass::Upsert, OpClass::Delete]
            .iter()
            .filter_map(|op| self.queues.get(&(kind, *op)))
            .map(TenantQueue::len)
            .sum()
    }
}
