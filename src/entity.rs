// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicated entities and mutation records.
//!
//! A [`MutationRecord`] is the unit that flows from a mutation notification,
//! through the [`EntityBuffer`](crate::batching::EntityBuffer), into the
//! document store. Each record is addressed by its [`EntityKind`], the tenant
//! it was captured under, and a [`NaturalKey`] that becomes the upsert filter.
//!
//! # Example
//!
//! ```
//! use mirror_sync::{EntityKind, MutationRecord, NaturalKey};
//! use serde_json::json;
//!
//! let doc = json!({"post_title": "A"}).as_object().cloned().unwrap();
//! let record = MutationRecord::upsert(EntityKind::ContentItem, 1, NaturalKey::Id(42), doc);
//!
//! assert_eq!(record.filter(), json!({"ID": 42}).as_object().cloned().unwrap());
//! assert_eq!(record.payload.as_ref().unwrap()["ID"], 42);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tenant (site/blog) identifier.
pub type TenantId = u64;

/// Opaque key-value document, as stored in the document store.
pub type Document = Map<String, Value>;

/// Document-store generated identifier.
pub type DocumentId = String;

/// The unit being replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    ContentItem,
    ContentItemField,
    TaxonomyTerm,
    TermField,
    User,
    UserField,
    Setting,
    Site,
    SiteField,
}

impl EntityKind {
    /// Entity-level kinds in replication order.
    pub const ENTITIES: [EntityKind; 5] = [
        EntityKind::ContentItem,
        EntityKind::TaxonomyTerm,
        EntityKind::User,
        EntityKind::Setting,
        EntityKind::Site,
    ];

    /// Field-level kinds in replication order.
    pub const FIELDS: [EntityKind; 4] = [
        EntityKind::ContentItemField,
        EntityKind::TermField,
        EntityKind::UserField,
        EntityKind::SiteField,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentItem => "content-item",
            Self::ContentItemField => "content-item-field",
            Self::TaxonomyTerm => "taxonomy-term",
            Self::TermField => "term-field",
            Self::User => "user",
            Self::UserField => "user-field",
            Self::Setting => "setting",
            Self::Site => "site",
            Self::SiteField => "site-field",
        }
    }

    #[must_use]
    pub fn is_field(&self) -> bool {
        matches!(
            self,
            Self::ContentItemField | Self::TermField | Self::UserField | Self::SiteField
        )
    }

    /// Field kind attached to an entity kind, if any.
    #[must_use]
    pub fn field_kind(&self) -> Option<EntityKind> {
        match self {
            Self::ContentItem => Some(Self::ContentItemField),
            Self::TaxonomyTerm => Some(Self::TermField),
            Self::User => Some(Self::UserField),
            Self::Site => Some(Self::SiteField),
            _ => None,
        }
    }

    /// Entity kind owning a field kind. Entity kinds return themselves.
    #[must_use]
    pub fn owner_kind(&self) -> EntityKind {
        match self {
            Self::ContentItemField => Self::ContentItem,
            Self::TermField => Self::TaxonomyTerm,
            Self::UserField => Self::User,
            Self::SiteField => Self::Site,
            other => *other,
        }
    }

    /// Column naming the owning entity in a field row.
    pub fn owner_field(&self) -> Option<&'static str> {
        match self {
            Self::ContentItemField => Some("post_id"),
            Self::TermField => Some("term_id"),
            Self::UserField => Some("user_id"),
            Self::SiteField => Some("site_id"),
            _ => None,
        }
    }

    /// Table/collection suffix appended to the (tenant) prefix.
    pub fn table_suffix(&self) -> &'static str {
        match self {
            Self::ContentItem => "posts",
            Self::ContentItemField => "postmeta",
            Self::TaxonomyTerm => "terms",
            Self::TermField => "termmeta",
            Self::User => "users",
            Self::UserField => "usermeta",
            Self::Setting => "options",
            Self::Site => "blogs",
            Self::SiteField => "sitemeta",
        }
    }

    /// Network-global kinds live outside any tenant's table scope.
    #[must_use]
    pub fn is_network_global(&self) -> bool {
        matches!(
            self,
            Self::User | Self::UserField | Self::Site | Self::SiteField
        )
    }

    /// Kinds whose rows carry a [`SyncMarker`](crate::storage::traits::SyncMarker).
    #[must_use]
    pub fn has_sync_marker(&self) -> bool {
        matches!(self, Self::ContentItem | Self::TaxonomyTerm | Self::User)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation class of a buffered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpClass {
    Upsert,
    Delete,
}

impl OpClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpClass::Upsert => "upsert",
            OpClass::Delete => "delete",
        }
    }
}

/// Stable identifier used as the upsert filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaturalKey {
    /// Numeric row id (posts, terms, users)
    Id(u64),
    /// Named row (options)
    Name(String),
    /// Blog within a network
    Site { blog_id: u64, site_id: u64 },
    /// Field row: owner id + field name
    Field { owner_id: u64, field_key: String },
}

impl NaturalKey {
    /// Numeric id of the entity this key addresses (owner id for fields).
    #[must_use]
    pub fn entity_id(&self) -> Option<u64> {
        match self {
            NaturalKey::Id(id) => Some(*id),
            NaturalKey::Site { blog_id, .. } => Some(*blog_id),
            NaturalKey::Field { owner_id, .. } => Some(*owner_id),
            NaturalKey::Name(_) => None,
        }
    }

    pub fn field_key(&self) -> Option<&str> {
        match self {
            NaturalKey::Field { field_key, .. } => Some(field_key),
            _ => None,
        }
    }

    /// Build the document-store filter for this key under `kind`.
    pub fn filter_for(&self, kind: EntityKind) -> Document {
        let mut filter = Document::new();
        match self {
            NaturalKey::Id(id) => {
                filter.insert("ID".into(), Value::from(*id));
            }
            NaturalKey::Name(name) => {
                filter.insert("option_name".into(), Value::from(name.clone()));
            }
            NaturalKey::Site { blog_id, site_id } => {
                filter.insert("blog_id".into(), Value::from(*blog_id));
                filter.insert("site_id".into(), Value::from(*site_id));
            }
            NaturalKey::Field { owner_id, field_key } => {
                let owner = kind.owner_field().unwrap_or("owner_id");
                filter.insert(owner.into(), Value::from(*owner_id));
                filter.insert("meta_key".into(), Value::from(field_key.clone()));
            }
        }
        filter
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaturalKey::Id(id) => write!(f, "{}", id),
            NaturalKey::Name(name) => write!(f, "{}", name),
            NaturalKey::Site { blog_id, site_id } => write!(f, "{}/{}", site_id, blog_id),
            NaturalKey::Field { owner_id, field_key } => write!(f, "{}:{}", owner_id, field_key),
        }
    }
}

/// How an entity is classified for eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Classification {
    #[default]
    Unclassified,
    ContentItem { post_type: String, status: String },
    Term { taxonomy: String },
}

/// An entity as delivered by a mutation notification or a reconciliation scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: NaturalKey,
    pub classification: Classification,
    pub document: Document,
}

impl Entity {
    pub fn post(id: u64, post_type: &str, status: &str, document: Document) -> Self {
        Self {
            key: NaturalKey::Id(id),
            classification: Classification::ContentItem {
                post_type: post_type.to_string(),
                status: status.to_string(),
            },
            document,
        }
    }

    pub fn term(id: u64, taxonomy: &str, document: Document) -> Self {
        Self {
            key: NaturalKey::Id(id),
            classification: Classification::Term { taxonomy: taxonomy.to_string() },
            document,
        }
    }

    pub fn user(id: u64, document: Document) -> Self {
        Self {
            key: NaturalKey::Id(id),
            classification: Classification::Unclassified,
            document,
        }
    }

    /// Option row. The payload follows the `{key, value}` shape of the options collection.
    pub fn setting(name: &str, value: Value) -> Self {
        let mut document = Document::new();
        document.insert("key".into(), Value::from(name));
        document.insert("value".into(), value);
        Self {
            key: NaturalKey::Name(name.to_string()),
            classification: Classification::Unclassified,
            document,
        }
    }

    pub fn site(blog_id: u64, site_id: u64, document: Document) -> Self {
        Self {
            key: NaturalKey::Site { blog_id, site_id },
            classification: Classification::Unclassified,
            document,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.key.entity_id()
    }
}

/// A captured mutation, owned by the buffer until drained.
///
/// Upserts carry a payload; deletes carry only the key. The payload always
/// contains the filter fields so the stored document identifies itself.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub key: NaturalKey,
    pub payload: Option<Document>,
}

impl MutationRecord {
    pub fn upsert(kind: EntityKind, tenant_id: TenantId, key: NaturalKey, mut payload: Document) -> Self {
        for (field, value) in key.filter_for(kind) {
            payload.insert(field, value);
        }
        Self { kind, tenant_id, key, payload: Some(payload) }
    }

    pub fn delete(kind: EntityKind, tenant_id: TenantId, key: NaturalKey) -> Self {
        Self { kind, tenant_id, key, payload: None }
    }

    #[must_use]
    pub fn op(&self) -> OpClass {
        if self.payload.is_some() { OpClass::Upsert } else { OpClass::Delete }
    }

    pub fn field_key(&self) -> Option<&str> {
        self.key.field_key()
    }

    /// Document-store filter (natural key, or field delete pattern).
    pub fn filter(&self) -> Document {
        self.key.filter_for(self.kind)
    }
}

/// Resolves table and collection names per tenant.
///
/// Tenant-scoped kinds on the main tenant use the bare prefix (`wp_posts`),
/// other tenants get a numeric segment (`wp_3_posts`). Network-global kinds
/// never carry the tenant segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNamer {
    prefix: String,
    main_tenant: TenantId,
}

impl TableNamer {
    pub fn new(prefix: impl Into<String>, main_tenant: TenantId) -> Self {
        Self { prefix: prefix.into(), main_tenant }
    }

    pub fn name(&self, kind: EntityKind, tenant: TenantId) -> String {
        self.raw(kind.table_suffix(), tenant, kind.is_network_global())
    }

    /// Name an arbitrary table (e.g. `term_taxonomy`) under the same rules.
    pub fn raw(&self, suffix: &str, tenant: TenantId, network_global: bool) -> String {
        if network_global || tenant == self.main_tenant {
            format!("{}{}", self.prefix, suffix)
        } else {
            format!("{}{}_{}", self.prefix, tenant, suffix)
        }
    }
}

/// Current time in epoch seconds.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entity_filters() {
        assert_eq!(NaturalKey::Id(7).filter_for(EntityKind::User), doc(json!({"ID": 7})));
        assert_eq!(
            NaturalKey::Name("blogname".into()).filter_for(EntityKind::Setting),
            doc(json!({"option_name": "blogname"}))
        );
        assert_eq!(
            NaturalKey::Site { blog_id: 3, site_id: 1 }.filter_for(EntityKind::Site),
            doc(json!({"blog_id": 3, "site_id": 1}))
        );
    }

    #[test]
    fn test_field_filter_uses_owner_column() {
        let key = NaturalKey::Field { owner_id: 42, field_key: "color".into() };
        assert_eq!(
            key.filter_for(EntityKind::ContentItemField),
            doc(json!({"post_id": 42, "meta_key": "color"}))
        );
        assert_eq!(
            key.filter_for(EntityKind::TermField),
            doc(json!({"term_id": 42, "meta_key": "color"}))
        );
    }

    #[test]
    fn test_upsert_payload_contains_filter() {
        let record = MutationRecord::upsert(
            EntityKind::ContentItemField,
            1,
            NaturalKey::Field { owner_id: 5, field_key: "k".into() },
            doc(json!({"meta_value": "v"})),
        );
        let payload = record.payload.as_ref().unwrap();
        assert_eq!(payload["post_id"], 5);
        assert_eq!(payload["meta_key"], "k");
        assert_eq!(payload["meta_value"], "v");
        assert_eq!(record.op(), OpClass::Upsert);
        assert_eq!(record.field_key(), Some("k"));
    }

    #[test]
    fn test_delete_has_no_payload() {
        let record = MutationRecord::delete(EntityKind::ContentItem, 2, NaturalKey::Id(9));
        assert_eq!(record.op(), OpClass::Delete);
        assert!(record.payload.is_none());
    }

    #[test]
    fn test_kind_relationships() {
        for kind in EntityKind::FIELDS {
            assert!(kind.is_field());
            assert_eq!(kind.owner_kind().field_kind(), Some(kind));
        }
        assert_eq!(EntityKind::Setting.field_kind(), None);
        assert!(EntityKind::User.has_sync_marker());
        assert!(!EntityKind::Setting.has_sync_marker());
    }

    #[test]
    fn test_table_namer() {
        let namer = TableNamer::new("wp_", 1);
        assert_eq!(namer.name(EntityKind::ContentItem, 1), "wp_posts");
        assert_eq!(namer.name(EntityKind::ContentItem, 3), "wp_3_posts");
        assert_eq!(namer.name(EntityKind::TermField, 3), "wp_3_termmeta");
        assert_eq!(namer.name(EntityKind::User, 3), "wp_users");
        assert_eq!(namer.name(EntityKind::Site, 2), "wp_blogs");
        assert_eq!(namer.raw("term_taxonomy", 2, false), "wp_2_term_taxonomy");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(format!("{}", EntityKind::ContentItem), "content-item");
        assert_eq!(format!("{}", NaturalKey::Field { owner_id: 1, field_key: "a".into() }), "1:a");
    }
}
