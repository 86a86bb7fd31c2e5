// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mutation handlers, one generic replicator per entity kind.
//!
//! [`EntityReplicator<K>`] turns "saved", "deleting" and field notifications
//! into buffered [`MutationRecord`](crate::entity::MutationRecord)s. All
//! kinds share the same flow; a [`ReplicatedKind`] only decides which natural
//! key it expects and which field rows it refuses.
//!
//! Saving an entity that carries a SyncMarker also writes the optimistic
//! enqueue flags. That write is best-effort: if it fails the record is still
//! buffered, and the scanner will find the entity again later.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::batching::EntityBuffer;
use crate::eligibility::EligibilityFilter;
use crate::entity::{now_secs, Document, Entity, EntityKind, NaturalKey, TenantId};
use crate::metrics;
use crate::storage::traits::MarkerStore;

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Enqueued,
    /// Out of scope (allow-list or excluded field key)
    Rejected,
    /// Not replicable at all (autosave, wrong key shape, no field kind)
    Ignored,
}

/// Kind-specific hooks.
pub trait ReplicatedKind: Send + Sync + 'static {
    const ENTITY: EntityKind;

    /// Natural key of an entity of this kind, if the key has the right shape.
    fn natural_key(entity: &Entity) -> Option<NaturalKey> {
        match entity.key {
            NaturalKey::Id(_) => Some(entity.key.clone()),
            _ => None,
        }
    }

    /// Whether a field row should be replicated at all.
    fn accepts_field(_owner_id: u64, _key: &str, _value: &Value) -> bool {
        true
    }
}

pub struct Posts;
pub struct Terms;
pub struct Users;
pub struct Settings;
pub struct Sites;

impl ReplicatedKind for Posts {
    const ENTITY: EntityKind = EntityKind::ContentItem;
}

impl ReplicatedKind for Terms {
    const ENTITY: EntityKind = EntityKind::TaxonomyTerm;
}

impl ReplicatedKind for Users {
    const ENTITY: EntityKind = EntityKind::User;
}

impl ReplicatedKind for Settings {
    const ENTITY: EntityKind = EntityKind::Setting;

    fn natural_key(entity: &Entity) -> Option<NaturalKey> {
        match &entity.key {
            NaturalKey::Name(name) if !name.is_empty() => Some(entity.key.clone()),
            _ => None,
        }
    }
}

impl ReplicatedKind for Sites {
    const ENTITY: EntityKind = EntityKind::Site;

    fn natural_key(entity: &Entity) -> Option<NaturalKey> {
        match entity.key {
            NaturalKey::Site { .. } => Some(entity.key.clone()),
            _ => None,
        }
    }

    /// Network options need a network, a key and a non-empty value.
    fn accepts_field(owner_id: u64, key: &str, value: &Value) -> bool {
        owner_id != 0 && !key.is_empty() && !is_empty_value(value)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

pub struct EntityReplicator<K: ReplicatedKind> {
    eligibility: Arc<EligibilityFilter>,
    markers: Arc<dyn MarkerStore>,
    _kind: PhantomData<K>,
}

impl<K: ReplicatedKind> EntityReplicator<K> {
    pub fn new(eligibility: Arc<EligibilityFilter>, markers: Arc<dyn MarkerStore>) -> Self {
        Self {
            eligibility,
            markers,
            _kind: PhantomData,
        }
    }

    fn admit(&self, entity: &Entity) -> Result<NaturalKey, Disposition> {
        let Some(key) = K::natural_key(entity) else {
            debug!(kind = %K::ENTITY, key = %entity.key, "Ignoring entity with unexpected key shape");
            return Err(Disposition::Ignored);
        };
        if !self.eligibility.is_eligible(K::ENTITY, &entity.classification) {
            metrics::record_rejected(K::ENTITY);
            return Err(Disposition::Rejected);
        }
        Ok(key)
    }

    pub async fn entity_saved(&self, buffer: &mut EntityBuffer, tenant: TenantId, entity: &Entity) -> Disposition {
        let key = match self.admit(entity) {
            Ok(key) => key,
            Err(disposition) => return disposition,
        };
        let entity_id = key.entity_id();
        buffer.enqueue_upsert(K::ENTITY, tenant, key, entity.document.clone());

        if let (true, Some(id)) = (K::ENTITY.has_sync_marker(), entity_id) {
            if let Err(e) = self.markers.mark_enqueued(tenant, K::ENTITY, id, now_secs()).await {
                warn!(kind = %K::ENTITY, id, error = %e, "Failed to write enqueue marker");
            }
        }
        Disposition::Enqueued
    }

    pub async fn entity_deleting(&self, buffer: &mut EntityBuffer, tenant: TenantId, entity: &Entity) -> Disposition {
        let key = match self.admit(entity) {
            Ok(key) => key,
            Err(disposition) => return disposition,
        };
        let entity_id = key.entity_id();
        buffer.enqueue_delete(K::ENTITY, tenant, key);

        if let (true, Some(id)) = (K::ENTITY.has_sync_marker(), entity_id) {
            if let Err(e) = self.markers.clear_marker(tenant, K::ENTITY, id).await {
                warn!(kind = %K::ENTITY, id, error = %e, "Failed to clear marker");
            }
        }
        Disposition::Enqueued
    }

    pub fn field_updated(
        &self,
        buffer: &mut EntityBuffer,
        tenant: TenantId,
        owner_id: u64,
        key: &str,
        value: Value,
    ) -> Disposition {
        let Some(field_kind) = K::ENTITY.field_kind() else {
            return Disposition::Ignored;
        };
        if self.eligibility.is_field_key_excluded(key) || !K::accepts_field(owner_id, key, &value) {
            metrics::record_rejected(field_kind);
            return Disposition::Rejected;
        }

        let mut payload = Document::new();
        payload.insert("meta_value".into(), value);
        buffer.enqueue_upsert(
            field_kind,
            tenant,
            NaturalKey::Field { owner_id, field_key: key.to_string() },
            payload,
        );
        Disposition::Enqueued
    }

    pub fn field_deleted(&self, buffer: &mut EntityBuffer, tenant: TenantId, owner_id: u64, key: &str) -> Disposition {
        let Some(field_kind) = K::ENTITY.field_kind() else {
            return Disposition::Ignored;
        };
        if self.eligibility.is_field_key_excluded(key) {
            metrics::record_rejected(field_kind);
            return Disposition::Rejected;
        }

        buffer.enqueue_delete(field_kind, tenant, NaturalKey::Field { owner_id, field_key: key.to_string() });
        Disposition::Enqueued
    }
}

/// The five replicators, dispatched by kind at runtime.
pub struct Replicators {
    pub posts: EntityReplicator<Posts>,
    pub terms: EntityReplicator<Terms>,
    pub users: EntityReplicator<Users>,
    pub settings: EntityReplicator<Settings>,
    pub sites: EntityReplicator<Sites>,
}

macro_rules! by_kind {
    ($self:ident, $kind:expr, |$r:ident| $body:expr) => {
        match $kind.owner_kind() {
            EntityKind::ContentItem => { let $r = &$self.posts; $body }
            EntityKind::TaxonomyTerm => { let $r = &$self.terms; $body }
            EntityKind::User => { let $r = &$self.users; $body }
            EntityKind::Setting => { let $r = &$self.settings; $body }
            _ => { let $r = &$self.sites; $body }
        }
    };
}

impl Replicators {
    pub fn new(eligibility: Arc<EligibilityFilter>, markers: Arc<dyn MarkerStore>) -> Self {
        Self {
            posts: EntityReplicator::new(eligibility.clone(), markers.clone()),
            terms: EntityReplicator::new(eligibility.clone(), markers.clone()),
            users: EntityReplicator::new(eligibility.clone(), markers.clone()),
            settings: EntityReplicator::new(eligibility.clone(), markers.clone()),
            sites: EntityReplicator::new(eligibility, markers),
        }
    }

    pub async fn entity_saved(&self, buffer: &mut EntityBuffer, kind: EntityKind, tenant: TenantId, entity: &Entity) -> Disposition {
        by_kind!(self, kind, |r| r.entity_saved(buffer, tenant, entity).await)
    }

    pub async fn entity_deleting(&self, buffer: &mut EntityBuffer, kind: EntityKind, tenant: TenantId, entity: &Entity) -> Disposition {
        by_kind!(self, kind, |r| r.entity_deleting(buffer, tenant, entity).await)
    }

    pub fn field_updated(
        &self,
        buffer: &mut EntityBuffer,
        kind: EntityKind,
        tenant: TenantId,
        owner_id: u64,
        key: &str,
        value: Value,
    ) -> Disposition {
        by_kind!(self, kind, |r| r.field_updated(buffer, tenant, owner_id, key, value))
    }

    pub fn field_deleted(&self, buffer: &mut EntityBuffer, kind: EntityKind, tenant: TenantId, owner_id: u64, key: &str) -> Disposition {
        by_kind!(self, kind, |r| r.field_deleted(buffer, tenant, owner_id, key))
    }
}
