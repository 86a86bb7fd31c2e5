// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request API: notifications in, one flush out.
//!
//! ```text
//! begin_request() ─► dispatch(event)* ─► finish_request() ─► FlushReport
//! ```

use serde_json::Value;
use tracing::trace;

use crate::batching::EntityBuffer;
use crate::entity::{Document, Entity, EntityKind, TenantId};
use crate::reconcile::ScanReport;
use crate::replicator::Disposition;
use crate::tenant::settled_tenant;

use super::{FlushReport, MirrorSync, SyncError};

/// A mutation notification from the host.
///
/// `kind` may name either the entity kind or its field kind; dispatch goes
/// by the owning entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEvent {
    /// Entity created or updated
    EntitySaved { kind: EntityKind, entity: Entity },
    /// Entity about to be removed
    EntityDeleting { kind: EntityKind, entity: Entity },
    FieldUpdated {
        kind: EntityKind,
        field_id: u64,
        owner_id: u64,
        key: String,
        value: Value,
    },
    FieldDeleted {
        kind: EntityKind,
        field_id: u64,
        owner_id: u64,
        key: String,
    },
}

impl MutationEvent {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::EntitySaved { kind, .. }
            | Self::EntityDeleting { kind, .. }
            | Self::FieldUpdated { kind, .. }
            | Self::FieldDeleted { kind, .. } => *kind,
        }
    }

    /// Option added or updated.
    pub fn option_updated(name: &str, value: Value) -> Self {
        Self::EntitySaved { kind: EntityKind::Setting, entity: Entity::setting(name, value) }
    }

    pub fn option_deleted(name: &str) -> Self {
        Self::EntityDeleting { kind: EntityKind::Setting, entity: Entity::setting(name, Value::Null) }
    }

    /// Site initialized or updated.
    pub fn site_saved(blog_id: u64, site_id: u64, document: Document) -> Self {
        Self::EntitySaved { kind: EntityKind::Site, entity: Entity::site(blog_id, site_id, document) }
    }

    pub fn site_deleted(blog_id: u64, site_id: u64) -> Self {
        Self::EntityDeleting { kind: EntityKind::Site, entity: Entity::site(blog_id, site_id, Document::new()) }
    }

    /// Network option added or updated.
    pub fn site_option_updated(network_id: u64, key: &str, value: Value) -> Self {
        Self::FieldUpdated {
            kind: EntityKind::SiteField,
            field_id: 0,
            owner_id: network_id,
            key: key.to_string(),
            value,
        }
    }

    pub fn site_option_deleted(network_id: u64, key: &str) -> Self {
        Self::FieldDeleted {
            kind: EntityKind::SiteField,
            field_id: 0,
            owner_id: network_id,
            key: key.to_string(),
        }
    }
}

impl MirrorSync {
    // ═══════════════════════════════════════════════════════════════════════
    // API: Per-request replication
    // ═══════════════════════════════════════════════════════════════════════

    /// Fresh buffer for one request.
    #[must_use]
    pub fn begin_request(&self) -> EntityBuffer {
        EntityBuffer::new()
    }

    /// Buffer for an autosave request: every notification is ignored.
    #[must_use]
    pub fn begin_autosave_request(&self) -> EntityBuffer {
        EntityBuffer::autosave()
    }

    /// Route one notification to its replicator.
    ///
    /// Site kinds are recorded under the main tenant; everything else under
    /// the tenant currently active on the host, read once no flush has the
    /// host switched.
    pub async fn dispatch(&self, buffer: &mut EntityBuffer, event: MutationEvent) -> Result<Disposition, SyncError> {
        let runtime = self.runtime()?;
        if buffer.is_autosave() {
            return Ok(Disposition::Ignored);
        }

        let tenant = self.tenant_for(event.kind()).await;
        let replicators = &runtime.replicators;
        let disposition = match event {
            MutationEvent::EntitySaved { kind, entity } => replicators.entity_saved(buffer, kind, tenant, &entity).await,
            MutationEvent::EntityDeleting { kind, entity } => {
                replicators.entity_deleting(buffer, kind, tenant, &entity).await
            }
            MutationEvent::FieldUpdated { kind, field_id, owner_id, key, value } => {
                trace!(%kind, field_id, owner_id, %key, "Field updated");
                replicators.field_updated(buffer, kind, tenant, owner_id, &key, value)
            }
            MutationEvent::FieldDeleted { kind, field_id, owner_id, key } => {
                trace!(%kind, field_id, owner_id, %key, "Field deleted");
                replicators.field_deleted(buffer, kind, tenant, owner_id, &key)
            }
        };
        Ok(disposition)
    }

    /// Flush everything the request buffered.
    pub async fn finish_request(&self, buffer: EntityBuffer) -> Result<FlushReport, SyncError> {
        let runtime = self.runtime()?;
        Ok(runtime.flusher.flush(buffer).await)
    }

    /// Run one reconciliation pass for `kind` now, outside the cron schedule.
    pub async fn run_scan(&self, kind: EntityKind) -> Result<ScanReport, SyncError> {
        let runtime = self.runtime()?;
        Ok(runtime.scanner.run(kind).await?)
    }

    async fn tenant_for(&self, kind: EntityKind) -> TenantId {
        match kind.owner_kind() {
            EntityKind::Site => self.config.main_tenant,
            _ => settled_tenant(self.collaborators.tenants.as_ref()).await,
        }
    }
}
