// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation scanner.
//!
//! Finds entities whose SyncMarker has no confirmed document id, replays
//! them (and all their field rows) as if they had just been saved, and
//! flushes the result in one cycle. The untracked counter is written twice:
//! the number found before the flush, then `found - upserted` after it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::batching::EntityBuffer;
use crate::coordinator::{FlushCoordinator, FlushReport, Stage};
use crate::eligibility::EligibilityFilter;
use crate::entity::{EntityKind, TenantId};
use crate::metrics;
use crate::replicator::{Disposition, Replicators};
use crate::storage::traits::{CounterStore, RelationalSource, StoreError};
use crate::tenant::{settled_tenant, TenantContext};

/// Persisted counter name for a scannable kind.
pub fn counter_name(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::ContentItem => Some("sync_untracked_posts"),
        EntityKind::TaxonomyTerm => Some("sync_untracked_terms"),
        EntityKind::User => Some("sync_untracked_users"),
        _ => None,
    }
}

/// Outcome of one scan cycle.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub kind: EntityKind,
    /// Nothing eligible for this kind; no query ran
    pub skipped: bool,
    /// Unsynced entities matching the scope (not just this page)
    pub found: u64,
    pub enqueued: usize,
    pub fields_enqueued: usize,
    /// Entity upserts the flush confirmed
    pub upserted: usize,
    pub untracked: u64,
    pub flush: FlushReport,
}

impl ScanReport {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            skipped: false,
            found: 0,
            enqueued: 0,
            fields_enqueued: 0,
            upserted: 0,
            untracked: 0,
            flush: FlushReport::default(),
        }
    }
}

pub struct ReconciliationScanner {
    eligibility: Arc<EligibilityFilter>,
    replicators: Arc<Replicators>,
    flusher: FlushCoordinator,
    source: Arc<dyn RelationalSource>,
    counters: Arc<dyn CounterStore>,
    tenants: Arc<dyn TenantContext>,
    page_size: usize,
}

impl ReconciliationScanner {
    pub fn new(
        eligibility: Arc<EligibilityFilter>,
        replicators: Arc<Replicators>,
        flusher: FlushCoordinator,
        source: Arc<dyn RelationalSource>,
        counters: Arc<dyn CounterStore>,
        tenants: Arc<dyn TenantContext>,
        page_size: usize,
    ) -> Self {
        Self {
            eligibility,
            replicators,
            flusher,
            source,
            counters,
            tenants,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Run one scan-and-flush cycle for `kind` in the current tenant.
    ///
    /// Only the host's current tenant is scanned. In a multi-tenant network
    /// each site drives its own scan (one cron run per tenant); other
    /// tenants' unsynced entities are left for their own runs.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn run(&self, kind: EntityKind) -> Result<ScanReport, StoreError> {
        let mut report = ScanReport::new(kind);
        let Some(scope) = self.eligibility.scan_scope(kind) else {
            debug!("Nothing eligible, scan skipped");
            report.skipped = true;
            return Ok(report);
        };

        let tenant = settled_tenant(self.tenants.as_ref()).await;
        let page = self.source.find_unsynced(tenant, &scope, self.page_size).await?;
        report.found = page.total_found;
        metrics::set_scan_found(kind, page.total_found);
        self.persist_untracked(tenant, kind, page.total_found).await;

        let mut buffer = EntityBuffer::new();
        for entity in &page.entities {
            if self.replicators.entity_saved(&mut buffer, kind, tenant, entity).await == Disposition::Enqueued {
                report.enqueued += 1;
            } else {
                continue;
            }

            let Some(owner_id) = entity.id() else { continue };
            match self.source.field_rows(tenant, kind, owner_id).await {
                Ok(rows) => {
                    for (key, value) in rows {
                        if self.replicators.field_updated(&mut buffer, kind, tenant, owner_id, &key, value)
                            == Disposition::Enqueued
                        {
                            report.fields_enqueued += 1;
                        }
                    }
                }
                Err(e) => warn!(owner_id, error = %e, "Could not read field rows; entity replayed without them"),
            }
        }

        report.flush = self.flusher.flush(buffer).await;
        report.upserted = report.flush.succeeded(Stage::EntityUpserts, kind);
        report.untracked = report.found.saturating_sub(report.upserted as u64);
        self.persist_untracked(tenant, kind, report.untracked).await;

        if report.found > 0 {
            info!(
                found = report.found,
                enqueued = report.enqueued,
                fields = report.fields_enqueued,
                untracked = report.untracked,
                "Reconciliation pass complete"
            );
        }
        Ok(report)
    }

    async fn persist_untracked(&self, tenant: TenantId, kind: EntityKind, value: u64) {
        metrics::set_untracked(kind, value);
        let Some(name) = counter_name(kind) else { return };
        if let Err(e) = self.counters.set_counter(tenant, name, value).await {
            warn!(counter = name, error = %e, "Failed to persist untracked count");
        }
    }
}
