// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL content store over the WordPress schema.
//!
//! Reads unsynced entities for the reconciliation scanner, and keeps
//! SyncMarkers as meta rows next to the entity they describe:
//!
//! ```sql
//! -- Posts lacking a confirmed document id
//! SELECT e.ID, ... FROM wp_posts e
//! LEFT JOIN wp_postmeta m ON m.post_id = e.ID AND m.meta_key = 'mirror_sync_inserted_id'
//! WHERE e.post_type IN (...) AND e.post_status IN (...)
//!   AND (m.meta_id IS NULL OR m.meta_value = '')
//! ORDER BY e.ID LIMIT 100
//! ```
//!
//! Counters live in the tenant's options table.
//!
//! ## sqlx Any Driver Quirks
//!
//! MySQL LONGTEXT comes back as bytes through the `Any` driver, so text
//! columns are read as `String` first and `Vec<u8>` second. Date columns are
//! selected through `CAST(... AS CHAR)` for the same reason.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;

use crate::entity::{Document, Entity, EntityKind, TableNamer, TenantId};
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{
    marker_keys, CounterStore, MarkerStore, RelationalSource, ScanPage, ScanScope, StoreError, SyncMarker,
};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Text column, as String (SQLite) or bytes (MySQL LONGTEXT)
fn text(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(Clone, Copy)]
enum Col {
    Int(&'static str),
    Text(&'static str),
}

const POST_COLUMNS: &[Col] = &[
    Col::Int("ID"),
    Col::Int("post_author"),
    Col::Text("post_date"),
    Col::Text("post_content"),
    Col::Text("post_title"),
    Col::Text("post_status"),
    Col::Text("post_name"),
    Col::Text("post_type"),
    Col::Text("post_modified"),
];

const TERM_COLUMNS: &[Col] = &[
    Col::Int("term_id"),
    Col::Text("name"),
    Col::Text("slug"),
    Col::Int("term_group"),
];

const TAXONOMY_COLUMNS: &[Col] = &[
    Col::Int("term_taxonomy_id"),
    Col::Text("taxonomy"),
    Col::Text("description"),
    Col::Int("parent"),
    Col::Int("count"),
];

const USER_COLUMNS: &[Col] = &[
    Col::Int("ID"),
    Col::Text("user_login"),
    Col::Text("user_nicename"),
    Col::Text("user_email"),
    Col::Text("user_registered"),
    Col::Text("display_name"),
];

fn select_list(alias: &str, columns: &[Col]) -> Vec<String> {
    columns
        .iter()
        .map(|col| match col {
            Col::Int(name) => format!("{alias}.{name} AS {name}"),
            Col::Text(name) => format!("CAST({alias}.{name} AS CHAR) AS {name}"),
        })
        .collect()
}

fn read_columns(row: &AnyRow, columns: &[Col], doc: &mut Document) {
    for col in columns {
        match col {
            Col::Int(name) => {
                let value = row.try_get::<i64, _>(*name).map(Value::from).unwrap_or(Value::Null);
                doc.insert(name.to_string(), value);
            }
            Col::Text(name) => {
                let value = text(row, name).map(Value::String).unwrap_or(Value::Null);
                doc.insert(name.to_string(), value);
            }
        }
    }
}

fn str_field<'a>(doc: &'a Document, field: &str) -> &'a str {
    doc.get(field).and_then(Value::as_str).unwrap_or_default()
}

/// Pieces of an unsynced-entity query: shared by the page and count variants.
struct UnsyncedQuery {
    select: Vec<String>,
    from: String,
    filter: String,
    order: String,
    binds: Vec<String>,
}

pub struct SqlContentStore {
    pool: AnyPool,
    is_sqlite: bool,
    namer: TableNamer,
}

impl SqlContentStore {
    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str, namer: TableNamer) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 1 } else { 10 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))
        })
        .await?;

        Ok(Self { pool, is_sqlite, namer })
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    fn table(&self, kind: EntityKind, tenant: TenantId) -> String {
        self.namer.name(kind, tenant)
    }

    /// Meta table, owner column and row id column for an entity kind.
    fn meta_table(&self, kind: EntityKind, tenant: TenantId) -> Result<(String, &'static str, &'static str), StoreError> {
        let owner = kind.owner_kind();
        let field_kind = owner
            .field_kind()
            .ok_or_else(|| StoreError::Backend(format!("{} has no field table", owner)))?;
        let owner_column = field_kind.owner_field().unwrap_or("post_id");
        let id_column = if owner == EntityKind::User { "umeta_id" } else { "meta_id" };
        Ok((self.table(field_kind, tenant), owner_column, id_column))
    }

    /// Create the tables a tenant uses, plus the network-global ones.
    pub async fn init_schema(&self, tenant: TenantId) -> Result<(), StoreError> {
        let posts = self.table(EntityKind::ContentItem, tenant);
        let postmeta = self.table(EntityKind::ContentItemField, tenant);
        let terms = self.table(EntityKind::TaxonomyTerm, tenant);
        let term_taxonomy = self.namer.raw("term_taxonomy", tenant, false);
        let termmeta = self.table(EntityKind::TermField, tenant);
        let options = self.table(EntityKind::Setting, tenant);
        let users = self.table(EntityKind::User, tenant);
        let usermeta = self.table(EntityKind::UserField, tenant);

        let statements = if self.is_sqlite {
            let id = "INTEGER PRIMARY KEY AUTOINCREMENT";
            vec![
                format!("CREATE TABLE IF NOT EXISTS {posts} (ID {id}, post_author INTEGER NOT NULL DEFAULT 0, post_date TEXT NOT NULL DEFAULT '', post_content TEXT NOT NULL DEFAULT '', post_title TEXT NOT NULL DEFAULT '', post_status TEXT NOT NULL DEFAULT 'publish', post_name TEXT NOT NULL DEFAULT '', post_type TEXT NOT NULL DEFAULT 'post', post_modified TEXT NOT NULL DEFAULT '')"),
                format!("CREATE TABLE IF NOT EXISTS {postmeta} (meta_id {id}, post_id INTEGER NOT NULL DEFAULT 0, meta_key TEXT, meta_value TEXT)"),
                format!("CREATE TABLE IF NOT EXISTS {terms} (term_id {id}, name TEXT NOT NULL DEFAULT '', slug TEXT NOT NULL DEFAULT '', term_group INTEGER NOT NULL DEFAULT 0)"),
                format!("CREATE TABLE IF NOT EXISTS {term_taxonomy} (term_taxonomy_id {id}, term_id INTEGER NOT NULL DEFAULT 0, taxonomy TEXT NOT NULL DEFAULT '', description TEXT NOT NULL DEFAULT '', parent INTEGER NOT NULL DEFAULT 0, count INTEGER NOT NULL DEFAULT 0)"),
                format!("CREATE TABLE IF NOT EXISTS {termmeta} (meta_id {id}, term_id INTEGER NOT NULL DEFAULT 0, meta_key TEXT, meta_value TEXT)"),
                format!("CREATE TABLE IF NOT EXISTS {options} (option_id {id}, option_name TEXT NOT NULL UNIQUE, option_value TEXT NOT NULL DEFAULT '', autoload TEXT NOT NULL DEFAULT 'yes')"),
                format!("CREATE TABLE IF NOT EXISTS {users} (ID {id}, user_login TEXT NOT NULL DEFAULT '', user_nicename TEXT NOT NULL DEFAULT '', user_email TEXT NOT NULL DEFAULT '', user_registered TEXT NOT NULL DEFAULT '', display_name TEXT NOT NULL DEFAULT '')"),
                format!("CREATE TABLE IF NOT EXISTS {usermeta} (umeta_id {id}, user_id INTEGER NOT NULL DEFAULT 0, meta_key TEXT, meta_value TEXT)"),
            ]
        } else {
            let id = "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY";
            let date = "DATETIME NOT NULL DEFAULT '1970-01-01 00:00:00'";
            vec![
                format!("CREATE TABLE IF NOT EXISTS {posts} (ID {id}, post_author BIGINT NOT NULL DEFAULT 0, post_date {date}, post_content LONGTEXT NOT NULL, post_title TEXT NOT NULL, post_status VARCHAR(20) NOT NULL DEFAULT 'publish', post_name VARCHAR(200) NOT NULL DEFAULT '', post_type VARCHAR(20) NOT NULL DEFAULT 'post', post_modified {date}, INDEX type_status (post_type, post_status))"),
                format!("CREATE TABLE IF NOT EXISTS {postmeta} (meta_id {id}, post_id BIGINT NOT NULL DEFAULT 0, meta_key VARCHAR(255), meta_value LONGTEXT, INDEX post_id (post_id), INDEX meta_key (meta_key(191)))"),
                format!("CREATE TABLE IF NOT EXISTS {terms} (term_id {id}, name VARCHAR(200) NOT NULL DEFAULT '', slug VARCHAR(200) NOT NULL DEFAULT '', term_group BIGINT NOT NULL DEFAULT 0)"),
                format!("CREATE TABLE IF NOT EXISTS {term_taxonomy} (term_taxonomy_id {id}, term_id BIGINT NOT NULL DEFAULT 0, taxonomy VARCHAR(32) NOT NULL DEFAULT '', description LONGTEXT NOT NULL, parent BIGINT NOT NULL DEFAULT 0, count BIGINT NOT NULL DEFAULT 0, INDEX taxonomy (taxonomy))"),
                format!("CREATE TABLE IF NOT EXISTS {termmeta} (meta_id {id}, term_id BIGINT NOT NULL DEFAULT 0, meta_key VARCHAR(255), meta_value LONGTEXT, INDEX term_id (term_id))"),
                format!("CREATE TABLE IF NOT EXISTS {options} (option_id {id}, option_name VARCHAR(191) NOT NULL UNIQUE, option_value LONGTEXT NOT NULL, autoload VARCHAR(20) NOT NULL DEFAULT 'yes')"),
                format!("CREATE TABLE IF NOT EXISTS {users} (ID {id}, user_login VARCHAR(60) NOT NULL DEFAULT '', user_nicename VARCHAR(50) NOT NULL DEFAULT '', user_email VARCHAR(100) NOT NULL DEFAULT '', user_registered {date}, display_name VARCHAR(250) NOT NULL DEFAULT '')"),
                format!("CREATE TABLE IF NOT EXISTS {usermeta} (umeta_id {id}, user_id BIGINT NOT NULL DEFAULT 0, meta_key VARCHAR(255), meta_value LONGTEXT, INDEX user_id (user_id))"),
            ]
        };

        for sql in &statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    async fn execute(&self, name: &str, sql: &str, binds: &[Value]) -> Result<u64, StoreError> {
        retry(name, &RetryConfig::query(), || async {
            let mut query = sqlx::query(sql);
            for value in binds {
                query = match value {
                    Value::Number(n) => query.bind(n.as_i64().unwrap_or_default()),
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
            }
            query.execute(&self.pool).await.map(|r| r.rows_affected()).map_err(backend)
        })
        .await
    }

    async fn fetch(&self, name: &str, sql: &str, binds: &[Value]) -> Result<Vec<AnyRow>, StoreError> {
        retry(name, &RetryConfig::query(), || async {
            let mut query = sqlx::query(sql);
            for value in binds {
                query = match value {
                    Value::Number(n) => query.bind(n.as_i64().unwrap_or_default()),
                    Value::String(s) => query.bind(s.clone()),
                    other => query.bind(other.to_string()),
                };
            }
            query.fetch_all(&self.pool).await.map_err(backend)
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Row writers (fixtures, demos, host-side tooling)
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn insert_post(&self, tenant: TenantId, id: u64, post_type: &str, status: &str, title: &str) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (ID, post_type, post_status, post_title, post_content, post_name) VALUES (?, ?, ?, ?, '', ?)",
            self.table(EntityKind::ContentItem, tenant)
        );
        let slug = title.to_lowercase().replace(' ', "-");
        self.execute("sql_insert_post", &sql, &[Value::from(id), Value::from(post_type), Value::from(status), Value::from(title), Value::from(slug)])
            .await
            .map(|_| ())
    }

    pub async fn insert_term(&self, tenant: TenantId, id: u64, taxonomy: &str, name: &str) -> Result<(), StoreError> {
        let terms = format!("INSERT INTO {} (term_id, name, slug) VALUES (?, ?, ?)", self.table(EntityKind::TaxonomyTerm, tenant));
        let slug = name.to_lowercase().replace(' ', "-");
        self.execute("sql_insert_term", &terms, &[Value::from(id), Value::from(name), Value::from(slug)]).await?;

        let taxonomy_sql = format!(
            "INSERT INTO {} (term_id, taxonomy, description) VALUES (?, ?, '')",
            self.namer.raw("term_taxonomy", tenant, false)
        );
        self.execute("sql_insert_term_taxonomy", &taxonomy_sql, &[Value::from(id), Value::from(taxonomy)])
            .await
            .map(|_| ())
    }

    pub async fn insert_user(&self, id: u64, login: &str, email: &str) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (ID, user_login, user_nicename, user_email, display_name) VALUES (?, ?, ?, ?, ?)",
            self.table(EntityKind::User, 0)
        );
        self.execute("sql_insert_user", &sql, &[Value::from(id), Value::from(login), Value::from(login), Value::from(email), Value::from(login)])
            .await
            .map(|_| ())
    }

    /// Insert or update one meta row of an entity.
    pub async fn set_meta(&self, tenant: TenantId, kind: EntityKind, owner_id: u64, key: &str, value: &str) -> Result<(), StoreError> {
        let (table, owner_column, _) = self.meta_table(kind, tenant)?;
        let binds = [Value::from(owner_id), Value::from(key)];

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM {table} WHERE {owner_column} = ? AND meta_key = ?");
        let rows = self.fetch("sql_meta_exists", &count_sql, &binds).await?;
        let exists = rows.first().and_then(|r| r.try_get::<i64, _>("cnt").ok()).unwrap_or(0) > 0;

        if exists {
            let sql = format!("UPDATE {table} SET meta_value = ? WHERE {owner_column} = ? AND meta_key = ?");
            self.execute("sql_meta_update", &sql, &[Value::from(value), binds[0].clone(), binds[1].clone()]).await?;
        } else {
            let sql = format!("INSERT INTO {table} ({owner_column}, meta_key, meta_value) VALUES (?, ?, ?)");
            self.execute("sql_meta_insert", &sql, &[binds[0].clone(), binds[1].clone(), Value::from(value)]).await?;
        }
        Ok(())
    }

    fn unsynced_query(&self, tenant: TenantId, scope: &ScanScope) -> UnsyncedQuery {
        let inserted = marker_keys::INSERTED_ID.to_string();
        match scope {
            ScanScope::ContentItems { types, statuses } => {
                let mut binds = vec![inserted];
                binds.extend(types.iter().cloned());
                binds.extend(statuses.iter().cloned());
                UnsyncedQuery {
                    select: select_list("e", POST_COLUMNS),
                    from: format!(
                        "{} e LEFT JOIN {} m ON m.post_id = e.ID AND m.meta_key = ?",
                        self.table(EntityKind::ContentItem, tenant),
                        self.table(EntityKind::ContentItemField, tenant)
                    ),
                    filter: format!(
                        "e.post_type IN ({}) AND e.post_status IN ({}) AND (m.meta_id IS NULL OR m.meta_value = '')",
                        placeholders(types.len()),
                        placeholders(statuses.len())
                    ),
                    order: "e.ID".into(),
                    binds,
                }
            }
            ScanScope::Terms { taxonomies } => {
                let mut binds = vec![inserted];
                binds.extend(taxonomies.iter().cloned());
                let mut select = select_list("e", TERM_COLUMNS);
                select.extend(select_list("tt", TAXONOMY_COLUMNS));
                UnsyncedQuery {
                    select,
                    from: format!(
                        "{} e JOIN {} tt ON tt.term_id = e.term_id LEFT JOIN {} m ON m.term_id = e.term_id AND m.meta_key = ?",
                        self.table(EntityKind::TaxonomyTerm, tenant),
                        self.namer.raw("term_taxonomy", tenant, false),
                        self.table(EntityKind::TermField, tenant)
                    ),
                    filter: format!(
                        "tt.taxonomy IN ({}) AND (m.meta_id IS NULL OR m.meta_value = '')",
                        placeholders(taxonomies.len())
                    ),
                    order: "e.term_id".into(),
                    binds,
                }
            }
            ScanScope::Users => UnsyncedQuery {
                select: select_list("e", USER_COLUMNS),
                from: format!(
                    "{} e LEFT JOIN {} m ON m.user_id = e.ID AND m.meta_key = ?",
                    self.table(EntityKind::User, tenant),
                    self.table(EntityKind::UserField, tenant)
                ),
                filter: "(m.umeta_id IS NULL OR m.meta_value = '')".into(),
                order: "e.ID".into(),
                binds: vec![inserted],
            },
        }
    }

    fn row_to_entity(scope: &ScanScope, row: &AnyRow) -> Option<Entity> {
        let mut doc = Document::new();
        match scope {
            ScanScope::ContentItems { .. } => {
                read_columns(row, POST_COLUMNS, &mut doc);
                let id = doc.get("ID").and_then(Value::as_u64)?;
                let post_type = str_field(&doc, "post_type").to_string();
                let status = str_field(&doc, "post_status").to_string();
                Some(Entity::post(id, &post_type, &status, doc))
            }
            ScanScope::Terms { .. } => {
                read_columns(row, TERM_COLUMNS, &mut doc);
                read_columns(row, TAXONOMY_COLUMNS, &mut doc);
                let id = doc.get("term_id").and_then(Value::as_u64)?;
                let taxonomy = str_field(&doc, "taxonomy").to_string();
                Some(Entity::term(id, &taxonomy, doc))
            }
            ScanScope::Users => {
                read_columns(row, USER_COLUMNS, &mut doc);
                let id = doc.get("ID").and_then(Value::as_u64)?;
                Some(Entity::user(id, doc))
            }
        }
    }

    async fn delete_meta_keys(&self, tenant: TenantId, kind: EntityKind, owner_id: u64, keys: &[&str]) -> Result<(), StoreError> {
        let (table, owner_column, _) = self.meta_table(kind, tenant)?;
        let sql = format!(
            "DELETE FROM {table} WHERE {owner_column} = ? AND meta_key IN ({})",
            placeholders(keys.len())
        );
        let mut binds = vec![Value::from(owner_id)];
        binds.extend(keys.iter().map(|k| Value::from(*k)));
        self.execute("sql_meta_delete", &sql, &binds).await.map(|_| ())
    }
}

#[async_trait]
impl RelationalSource for SqlContentStore {
    async fn find_unsynced(&self, tenant: TenantId, scope: &ScanScope, limit: usize) -> Result<ScanPage, StoreError> {
        let query = self.unsynced_query(tenant, scope);
        let binds: Vec<Value> = query.binds.iter().cloned().map(Value::String).collect();

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM {} WHERE {}", query.from, query.filter);
        let total_found = self
            .fetch("sql_count_unsynced", &count_sql, &binds)
            .await?
            .first()
            .and_then(|row| row.try_get::<i64, _>("cnt").ok())
            .unwrap_or(0)
            .max(0) as u64;

        let page_sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT ?",
            query.select.join(", "),
            query.from,
            query.filter,
            query.order
        );
        let mut page_binds = binds;
        page_binds.push(Value::from(limit as u64));
        let rows = self.fetch("sql_find_unsynced", &page_sql, &page_binds).await?;

        let entities = rows.iter().filter_map(|row| Self::row_to_entity(scope, row)).collect();
        Ok(ScanPage { entities, total_found })
    }

    async fn field_rows(&self, tenant: TenantId, kind: EntityKind, owner_id: u64) -> Result<Vec<(String, Value)>, StoreError> {
        let (table, owner_column, id_column) = self.meta_table(kind, tenant)?;
        let sql = format!("SELECT meta_key, meta_value FROM {table} WHERE {owner_column} = ? ORDER BY {id_column}");
        let rows = self.fetch("sql_field_rows", &sql, &[Value::from(owner_id)]).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = text(row, "meta_key")?;
                let value = text(row, "meta_value").map(Value::String).unwrap_or(Value::Null);
                Some((key, value))
            })
            .collect())
    }
}

#[async_trait]
impl MarkerStore for SqlContentStore {
    async fn mark_enqueued(&self, tenant: TenantId, kind: EntityKind, entity_id: u64, synced_at: i64) -> Result<(), StoreError> {
        self.set_meta(tenant, kind, entity_id, marker_keys::IS_SYNCED, "1").await?;
        self.set_meta(tenant, kind, entity_id, marker_keys::LAST_SYNC, &synced_at.to_string()).await?;
        self.set_meta(tenant, kind, entity_id, marker_keys::SITE_ID, &tenant.to_string()).await
    }

    async fn clear_marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<(), StoreError> {
        self.delete_meta_keys(tenant, kind, entity_id, &marker_keys::ALL).await
    }

    async fn record_document_id(&self, tenant: TenantId, kind: EntityKind, entity_id: u64, document_id: &str) -> Result<(), StoreError> {
        self.set_meta(tenant, kind, entity_id, marker_keys::INSERTED_ID, document_id).await
    }

    async fn marker(&self, tenant: TenantId, kind: EntityKind, entity_id: u64) -> Result<Option<SyncMarker>, StoreError> {
        let (table, owner_column, _) = self.meta_table(kind, tenant)?;
        let sql = format!(
            "SELECT meta_key, meta_value FROM {table} WHERE {owner_column} = ? AND meta_key IN ({})",
            placeholders(marker_keys::ALL.len())
        );
        let mut binds = vec![Value::from(entity_id)];
        binds.extend(marker_keys::ALL.iter().map(|k| Value::from(*k)));
        let rows = self.fetch("sql_marker", &sql, &binds).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut marker = SyncMarker::default();
        for row in &rows {
            let (Some(key), value) = (text(row, "meta_key"), text(row, "meta_value").unwrap_or_default()) else {
                continue;
            };
            match key.as_str() {
                marker_keys::IS_SYNCED => marker.is_synced = value == "1",
                marker_keys::LAST_SYNC => marker.last_sync_time = value.parse().ok(),
                marker_keys::SITE_ID => marker.sync_site_id = value.parse().ok(),
                marker_keys::INSERTED_ID => marker.inserted_document_id = Some(value),
                _ => {}
            }
        }
        Ok(Some(marker))
    }
}

#[async_trait]
impl CounterStore for SqlContentStore {
    async fn set_counter(&self, tenant: TenantId, name: &str, value: u64) -> Result<(), StoreError> {
        let table = self.table(EntityKind::Setting, tenant);
        if self.option_exists(&table, name).await? {
            let update = format!("UPDATE {table} SET option_value = ? WHERE option_name = ?");
            self.execute("sql_counter_update", &update, &[Value::from(value.to_string()), Value::from(name)]).await?;
        } else {
            let insert = format!("INSERT INTO {table} (option_name, option_value, autoload) VALUES (?, ?, 'no')");
            self.execute("sql_counter_insert", &insert, &[Value::from(name), Value::from(value.to_string())]).await?;
        }
        Ok(())
    }

    async fn counter(&self, tenant: TenantId, name: &str) -> Result<Option<u64>, StoreError> {
        let sql = format!("SELECT option_value FROM {} WHERE option_name = ?", self.table(EntityKind::Setting, tenant));
        let rows = self.fetch("sql_counter", &sql, &[Value::from(name)]).await?;
        Ok(rows
            .first()
            .and_then(|row| text(row, "option_value"))
            .and_then(|v| v.trim().parse().ok()))
    }
}

impl SqlContentStore {
    async fn option_exists(&self, table: &str, name: &str) -> Result<bool, StoreError> {
        let sql = format!("SELECT COUNT(*) AS cnt FROM {table} WHERE option_name = ?");
        let rows = self.fetch("sql_option_exists", &sql, &[Value::from(name)]).await?;
        Ok(rows.first().and_then(|r| r.try_get::<i64, _>("cnt").ok()).unwrap_or(0) > 0)
    }
}
