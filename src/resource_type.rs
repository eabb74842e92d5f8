//! Resource and arrangement types, and the content schemas they carry.
//!
//! A type is `(family, key, title, parent, schema)`. The parent tree drives
//! template fallback and middleware inheritance only; a type's schema is
//! exactly what its own `ContentSchema` lists.
//!
//! Each type row carries a JSON snapshot of its schema (member key →
//! [`Interface`]). Every write that can change the snapshot (saving the
//! type, changing its schema, adding, updating or deleting a member) calls
//! [`refresh_snapshots`], so [`get_interface`] normally answers from the
//! blob. A blob that is missing or lacks the key is rebuilt from the member
//! tables and written back.

use crate::cache::{CachedSnapshot, RequestCache};
use crate::content_type::{self, ContentTypeId, arrangement_type_title, resource_type_title};
use crate::store::{Store, StoreError};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use tracing::debug;

pub type ResourceTypeId = i64;
pub type SchemaId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    List,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::Single => "single",
            Cardinality::List => "list",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "single" => Ok(Cardinality::Single),
            "list" => Ok(Cardinality::List),
            other => Err(StoreError::Invalid(format!("unknown cardinality '{other}'"))),
        }
    }
}

/// What the atom accessor needs to know about one schema member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub order: i64,
    pub key: String,
    pub title: String,
    pub cardinality: Cardinality,
    pub payload_type_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

/// Serialized form of a type's schema, keyed by member key.
pub type Snapshot = BTreeMap<String, Interface>;

/// Which kind of entity a type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    /// Request-addressable resources.
    Resource,
    /// Nestable sub-documents.
    Arrangement,
}

impl TypeFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeFamily::Resource => "resource",
            TypeFamily::Arrangement => "arrangement",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "resource" => Ok(TypeFamily::Resource),
            "arrangement" => Ok(TypeFamily::Arrangement),
            other => Err(StoreError::Invalid(format!("unknown type family '{other}'"))),
        }
    }

    /// Content type title of a type instance in this family.
    pub fn content_type_title(self, key: &str) -> String {
        match self {
            TypeFamily::Resource => resource_type_title(key),
            TypeFamily::Arrangement => arrangement_type_title(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceType {
    pub id: ResourceTypeId,
    pub family: TypeFamily,
    pub key: String,
    pub title: String,
    pub parent_id: Option<ResourceTypeId>,
    pub schema_id: Option<SchemaId>,
    /// This type's own row in the content type catalog.
    pub content_type_id: ContentTypeId,
}

impl ResourceType {
    pub fn content_type_title(&self) -> String {
        self.family.content_type_title(&self.key)
    }
}

/// Input for [`save_type`].
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub family: TypeFamily,
    pub key: String,
    pub title: String,
    pub parent: Option<ResourceTypeId>,
    pub schema: Option<SchemaId>,
}

impl TypeSpec {
    pub fn resource(key: &str) -> Self {
        Self {
            family: TypeFamily::Resource,
            key: key.to_string(),
            title: key.to_string(),
            parent: None,
            schema: None,
        }
    }

    pub fn arrangement(key: &str) -> Self {
        Self {
            family: TypeFamily::Arrangement,
            ..Self::resource(key)
        }
    }

    pub fn with_parent(mut self, parent: ResourceTypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_schema(mut self, schema: SchemaId) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }
}

/// Input for [`add_member`] and [`update_member`].
#[derive(Debug, Clone)]
pub struct MemberSpec {
    pub order: i64,
    pub key: String,
    pub title: String,
    pub cardinality: Cardinality,
    /// Content type title of the payload (`copy`, `image_type:hero`, ...).
    pub payload_type: String,
    pub validator: Option<String>,
}

impl MemberSpec {
    pub fn single(key: &str, payload_type: &str) -> Self {
        Self {
            order: 0,
            key: key.to_string(),
            title: key.to_string(),
            cardinality: Cardinality::Single,
            payload_type: payload_type.to_string(),
            validator: None,
        }
    }

    pub fn list(key: &str, payload_type: &str) -> Self {
        Self {
            cardinality: Cardinality::List,
            ..Self::single(key, payload_type)
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_validator(mut self, function: &str) -> Self {
        self.validator = Some(function.to_string());
        self
    }
}

// =============================================================================
// Schemas
// =============================================================================

/// Get-or-create a schema by title.
pub fn create_schema(conn: &Connection, title: &str) -> Result<SchemaId, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO content_schema (title) VALUES (?1)",
        params![title],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM content_schema WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )?)
}

fn function_id(conn: &Connection, title: &str) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO function (title, kind) VALUES (?1, 'validator')",
        params![title],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM function WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )?)
}

/// Add a member, or update it in place when `(schema, key)` already exists.
pub fn add_member(
    conn: &Connection,
    schema_id: SchemaId,
    member: &MemberSpec,
) -> Result<i64, StoreError> {
    if member.key.trim().is_empty() {
        return Err(StoreError::Invalid("schema member key must not be empty".into()));
    }
    let payload_type_id = content_type::get_or_create(
        conn,
        &member.payload_type,
        member.payload_type.contains(':'),
    )?;
    let validator_id = member
        .validator
        .as_deref()
        .map(|v| function_id(conn, v))
        .transpose()?;
    conn.execute(
        "INSERT INTO content_schema_member
             (schema_id, ord, key, title, cardinality, content_type_id, validator_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(schema_id, key) DO UPDATE SET
             ord = excluded.ord,
             title = excluded.title,
             cardinality = excluded.cardinality,
             content_type_id = excluded.content_type_id,
             validator_id = excluded.validator_id",
        params![
            schema_id,
            member.order,
            member.key,
            member.title,
            member.cardinality.as_str(),
            payload_type_id,
            validator_id,
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM content_schema_member WHERE schema_id = ?1 AND key = ?2",
        params![schema_id, member.key],
        |row| row.get(0),
    )?;
    refresh_snapshots(conn, schema_id)?;
    Ok(id)
}

/// Rewrite a member by id. The key may change.
pub fn update_member(
    conn: &Connection,
    member_id: i64,
    member: &MemberSpec,
) -> Result<(), StoreError> {
    let schema_id = member_schema(conn, member_id)?;
    let payload_type_id = content_type::get_or_create(
        conn,
        &member.payload_type,
        member.payload_type.contains(':'),
    )?;
    let validator_id = member
        .validator
        .as_deref()
        .map(|v| function_id(conn, v))
        .transpose()?;
    conn.execute(
        "UPDATE content_schema_member
         SET ord = ?2, key = ?3, title = ?4, cardinality = ?5, content_type_id = ?6,
             validator_id = ?7
         WHERE id = ?1",
        params![
            member_id,
            member.order,
            member.key,
            member.title,
            member.cardinality.as_str(),
            payload_type_id,
            validator_id,
        ],
    )?;
    refresh_snapshots(conn, schema_id)
}

pub fn delete_member(conn: &Connection, member_id: i64) -> Result<(), StoreError> {
    let schema_id = member_schema(conn, member_id)?;
    conn.execute(
        "DELETE FROM content_schema_member WHERE id = ?1",
        params![member_id],
    )?;
    refresh_snapshots(conn, schema_id)
}

fn member_schema(conn: &Connection, member_id: i64) -> Result<SchemaId, StoreError> {
    conn.query_row(
        "SELECT schema_id FROM content_schema_member WHERE id = ?1",
        params![member_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("schema member", member_id))
}

/// Build a snapshot straight from the member tables.
pub fn build_snapshot(
    conn: &Connection,
    schema_id: Option<SchemaId>,
) -> Result<Snapshot, StoreError> {
    let Some(schema_id) = schema_id else {
        return Ok(Snapshot::new());
    };
    let mut stmt = conn.prepare(
        "SELECT m.ord, m.key, m.title, m.cardinality, ct.title, f.title
         FROM content_schema_member m
         JOIN content_type ct ON ct.id = m.content_type_id
         LEFT JOIN function f ON f.id = m.validator_id
         WHERE m.schema_id = ?1
         ORDER BY m.ord, m.id",
    )?;
    let rows = stmt.query_map(params![schema_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;
    let mut snapshot = Snapshot::new();
    for row in rows {
        let (order, key, title, cardinality, payload_type_title, validator) = row?;
        snapshot.insert(
            key.clone(),
            Interface {
                order,
                key,
                title,
                cardinality: Cardinality::parse(&cardinality)?,
                payload_type_title,
                validator,
            },
        );
    }
    Ok(snapshot)
}

/// Recompute the stored snapshot of every type using `schema_id`.
pub fn refresh_snapshots(conn: &Connection, schema_id: SchemaId) -> Result<(), StoreError> {
    let snapshot = build_snapshot(conn, Some(schema_id))?;
    let blob = serde_json::to_string(&snapshot)?;
    let updated = conn.execute(
        "UPDATE resource_type SET schema_snapshot = ?2 WHERE schema_id = ?1",
        params![schema_id, blob],
    )?;
    debug!(schema_id, types = updated, "refreshed schema snapshots");
    Ok(())
}

fn refresh_type_snapshot(conn: &Connection, type_id: ResourceTypeId) -> Result<Snapshot, StoreError> {
    let schema_id: Option<SchemaId> = conn.query_row(
        "SELECT schema_id FROM resource_type WHERE id = ?1",
        params![type_id],
        |row| row.get(0),
    )?;
    let snapshot = build_snapshot(conn, schema_id)?;
    conn.execute(
        "UPDATE resource_type SET schema_snapshot = ?2 WHERE id = ?1",
        params![type_id, serde_json::to_string(&snapshot)?],
    )?;
    Ok(snapshot)
}

// =============================================================================
// Types
// =============================================================================

type TypeRow = (
    ResourceTypeId,
    String,
    String,
    String,
    Option<ResourceTypeId>,
    Option<SchemaId>,
    ContentTypeId,
);

fn row_to_type(row: &Row<'_>) -> rusqlite::Result<TypeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

const TYPE_COLUMNS: &str =
    "id, family, key, title, parent_id, schema_id, content_type_id FROM resource_type";

fn into_type(raw: TypeRow) -> Result<ResourceType, StoreError> {
    let (id, family, key, title, parent_id, schema_id, content_type_id) = raw;
    Ok(ResourceType {
        id,
        family: TypeFamily::parse(&family)?,
        key,
        title,
        parent_id,
        schema_id,
        content_type_id,
    })
}

pub fn load_type(conn: &Connection, id: ResourceTypeId) -> Result<ResourceType, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {TYPE_COLUMNS} WHERE id = ?1"),
            params![id],
            row_to_type,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("resource type", id))?;
    into_type(raw)
}

pub fn find_type(
    conn: &Connection,
    family: TypeFamily,
    key: &str,
) -> Result<Option<ResourceType>, StoreError> {
    conn.query_row(
        &format!("SELECT {TYPE_COLUMNS} WHERE family = ?1 AND key = ?2"),
        params![family.as_str(), key],
        row_to_type,
    )
    .optional()?
    .map(into_type)
    .transpose()
}

pub fn all_types(conn: &Connection) -> Result<Vec<ResourceType>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {TYPE_COLUMNS} ORDER BY family, key"))?;
    let raws = stmt
        .query_map([], row_to_type)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(into_type).collect()
}

/// Save a type by `(family, key)`: created on first save, updated afterwards.
///
/// Also get-or-creates the type's own content type row and refreshes its
/// schema snapshot.
pub fn save_type(conn: &Connection, spec: &TypeSpec) -> Result<ResourceType, StoreError> {
    if spec.key.trim().is_empty() {
        return Err(StoreError::Invalid("type key must not be empty".into()));
    }
    let content_type_id =
        content_type::get_or_create(conn, &spec.family.content_type_title(&spec.key), true)?;
    let id = match find_type(conn, spec.family, &spec.key)? {
        Some(existing) => {
            if let Some(parent) = spec.parent {
                check_no_cycle(conn, existing.id, parent)?;
            }
            conn.execute(
                "UPDATE resource_type SET title = ?2, parent_id = ?3, schema_id = ?4 WHERE id = ?1",
                params![existing.id, spec.title, spec.parent, spec.schema],
            )?;
            existing.id
        }
        None => {
            conn.execute(
                "INSERT INTO resource_type (family, key, title, parent_id, schema_id, content_type_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    spec.family.as_str(),
                    spec.key,
                    spec.title,
                    spec.parent,
                    spec.schema,
                    content_type_id,
                ],
            )?;
            conn.last_insert_rowid()
        }
    };
    refresh_type_snapshot(conn, id)?;
    load_type(conn, id)
}

pub fn set_parent(
    conn: &Connection,
    type_id: ResourceTypeId,
    parent: Option<ResourceTypeId>,
) -> Result<(), StoreError> {
    if let Some(parent) = parent {
        check_no_cycle(conn, type_id, parent)?;
    }
    conn.execute(
        "UPDATE resource_type SET parent_id = ?2 WHERE id = ?1",
        params![type_id, parent],
    )?;
    Ok(())
}

pub fn set_schema(
    conn: &Connection,
    type_id: ResourceTypeId,
    schema: Option<SchemaId>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE resource_type SET schema_id = ?2 WHERE id = ?1",
        params![type_id, schema],
    )?;
    refresh_type_snapshot(conn, type_id)?;
    Ok(())
}

fn check_no_cycle(
    conn: &Connection,
    type_id: ResourceTypeId,
    parent: ResourceTypeId,
) -> Result<(), StoreError> {
    let mut current = Some(parent);
    let mut seen = HashSet::new();
    while let Some(id) = current {
        if id == type_id {
            return Err(StoreError::Invalid(format!(
                "setting parent {parent} on type {type_id} would create a cycle"
            )));
        }
        if !seen.insert(id) {
            break;
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM resource_type WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

/// `type_id` followed by its ancestors, nearest first.
pub fn type_chain(conn: &Connection, type_id: ResourceTypeId) -> Result<Vec<ResourceTypeId>, StoreError> {
    let mut chain = vec![type_id];
    let mut current = type_id;
    loop {
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_id FROM resource_type WHERE id = ?1",
                params![current],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        match parent {
            Some(p) if !chain.contains(&p) => {
                chain.push(p);
                current = p;
            }
            _ => break,
        }
    }
    Ok(chain)
}

// =============================================================================
// Request-time lookups
// =============================================================================

/// Memoized [`type_chain`].
pub fn cached_chain(
    store: &Store,
    cache: &RequestCache,
    type_id: ResourceTypeId,
) -> Result<Rc<Vec<ResourceTypeId>>, StoreError> {
    cache.chain(type_id, || {
        store.read(|conn| type_chain(conn, type_id)).map(Rc::new)
    })
}

/// Memoized [`load_type`].
pub fn cached_type(
    store: &Store,
    cache: &RequestCache,
    type_id: ResourceTypeId,
) -> Result<Rc<ResourceType>, StoreError> {
    cache.resource_type(type_id, || {
        store.read(|conn| load_type(conn, type_id)).map(Rc::new)
    })
}

/// Look up the schema member `key` of `type_id`.
///
/// The first call for a type reads its snapshot blob; later calls within the
/// same request are answered from the request cache without touching the
/// store. A type without a schema trusts its blob outright. Otherwise a key
/// missing from the blob is checked once against the member tables, and the
/// blob is rewritten only when it turns out to be missing or stale. After
/// that check misses are final for the request.
pub fn get_interface(
    store: &Store,
    cache: &RequestCache,
    type_id: ResourceTypeId,
    key: &str,
) -> Result<Option<Interface>, StoreError> {
    let stored = match cache.snapshot(type_id) {
        Some(cached) => {
            if let Some(found) = cached.snapshot.get(key) {
                return Ok(Some(found.clone()));
            }
            if cached.fresh {
                return Ok(None);
            }
            Some(cached.snapshot)
        }
        None => {
            let (blob, schema_id): (Option<String>, Option<SchemaId>) = store.read(|conn| {
                Ok(conn.query_row(
                    "SELECT schema_snapshot, schema_id FROM resource_type WHERE id = ?1",
                    params![type_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })?;
            let snapshot = blob.and_then(|b| serde_json::from_str::<Snapshot>(&b).ok());
            match snapshot {
                Some(snapshot) => {
                    let snapshot = Rc::new(snapshot);
                    let found = snapshot.get(key).cloned();
                    let fresh = schema_id.is_none();
                    cache.put_snapshot(
                        type_id,
                        CachedSnapshot {
                            snapshot: Rc::clone(&snapshot),
                            fresh,
                        },
                    );
                    if found.is_some() || fresh {
                        return Ok(found);
                    }
                    Some(snapshot)
                }
                None => None,
            }
        }
    };

    debug!(type_id, key, "schema snapshot miss, checking member tables");
    let built = store.read(|conn| {
        let schema_id: Option<SchemaId> = conn.query_row(
            "SELECT schema_id FROM resource_type WHERE id = ?1",
            params![type_id],
            |row| row.get(0),
        )?;
        build_snapshot(conn, schema_id)
    })?;
    if stored.as_deref() != Some(&built) {
        debug!(type_id, "stored schema snapshot missing or stale, rewriting");
        let blob = serde_json::to_string(&built)?;
        store.write(|tx| {
            tx.execute(
                "UPDATE resource_type SET schema_snapshot = ?2 WHERE id = ?1",
                params![type_id, blob],
            )?;
            Ok(())
        })?;
    }
    let found = built.get(key).cloned();
    cache.put_snapshot(
        type_id,
        CachedSnapshot {
            snapshot: Rc::new(built),
            fresh: true,
        },
    );
    Ok(found)
}
