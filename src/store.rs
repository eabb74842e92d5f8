//! SQLite persistence for every stored entity.
//!
//! A single [`Store`] owns one connection behind `Arc<Mutex<_>>`. Each public
//! operation takes the lock for its own duration, so request workers
//! interleave at statement granularity and writes that touch several tables
//! run inside one transaction via [`Store::write`].
//!
//! Domain modules never hold the lock themselves: they expose free functions
//! over `&Connection` (a `Transaction` derefs to one) and the `Site` layer
//! decides the transaction boundaries.
//!
//! Uniqueness violations surface as [`StoreError::Conflict`] so callers can
//! distinguish "someone else got there first" from a broken database.

use rusqlite::{Connection, ErrorCode, Transaction};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    #[error("invalid value: {0}")]
    Invalid(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == ErrorCode::ConstraintViolation
                    && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
            {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Sqlite(err),
        }
    }
}

impl StoreError {
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Shared handle to the site database.
///
/// Cloning is cheap; clones share the connection and the query counter.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    queries: Arc<AtomicUsize>,
}

impl Store {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        debug!(path = %path.display(), "opening store");
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database (tests, `swim routes` dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            queries: Arc::new(AtomicUsize::new(0)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Number of round trips issued through [`read`](Self::read) and
    /// [`write`](Self::write) since the store was opened.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Run read-only statements under the lock.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// [`write`](Self::write) for callers whose own error type wraps
    /// [`StoreError`], so a domain rejection inside the transaction rolls it
    /// back without being squeezed into a store error.
    pub fn transact<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

/// Fixed relational layout. Per-type content shape lives in
/// `content_schema_member` rows and slot payload JSON, never in DDL.
const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS content_type (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    parametric INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS function (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS content_schema (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS content_schema_member (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_id INTEGER NOT NULL REFERENCES content_schema(id) ON DELETE CASCADE,
    ord INTEGER NOT NULL DEFAULT 0,
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    cardinality TEXT NOT NULL CHECK (cardinality IN ('single', 'list')),
    content_type_id INTEGER NOT NULL REFERENCES content_type(id),
    validator_id INTEGER REFERENCES function(id),
    UNIQUE(schema_id, key)
);

CREATE TABLE IF NOT EXISTS resource_type (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    family TEXT NOT NULL CHECK (family IN ('resource', 'arrangement')),
    key TEXT NOT NULL,
    title TEXT NOT NULL,
    parent_id INTEGER REFERENCES resource_type(id),
    schema_id INTEGER REFERENCES content_schema(id) ON DELETE SET NULL,
    content_type_id INTEGER NOT NULL REFERENCES content_type(id),
    schema_snapshot TEXT,
    UNIQUE(family, key)
);

CREATE TABLE IF NOT EXISTS template (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL CHECK (path = lower(path)),
    mime TEXT NOT NULL,
    payload_type_id INTEGER NOT NULL REFERENCES content_type(id),
    body TEXT NOT NULL,
    UNIQUE(path, mime, payload_type_id)
);

CREATE TABLE IF NOT EXISTS template_host (
    template_id INTEGER NOT NULL REFERENCES template(id) ON DELETE CASCADE,
    host TEXT NOT NULL CHECK (host = lower(host)),
    UNIQUE(template_id, host)
);

CREATE TABLE IF NOT EXISTS resource_type_template (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_type_id INTEGER NOT NULL REFERENCES resource_type(id) ON DELETE CASCADE,
    template_id INTEGER NOT NULL REFERENCES template(id) ON DELETE CASCADE,
    ord INTEGER NOT NULL DEFAULT 0,
    UNIQUE(resource_type_id, template_id)
);

CREATE TABLE IF NOT EXISTS resource_type_middleware (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_type_id INTEGER NOT NULL REFERENCES resource_type(id) ON DELETE CASCADE,
    function_id INTEGER NOT NULL REFERENCES function(id) ON DELETE CASCADE,
    ord INTEGER NOT NULL DEFAULT 0,
    UNIQUE(resource_type_id, function_id)
);

CREATE TABLE IF NOT EXISTS resource_type_response_processor (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_type_id INTEGER NOT NULL REFERENCES resource_type(id) ON DELETE CASCADE,
    function_id INTEGER NOT NULL REFERENCES function(id) ON DELETE CASCADE,
    ord INTEGER NOT NULL DEFAULT 0,
    UNIQUE(resource_type_id, function_id)
);

CREATE TABLE IF NOT EXISTS link (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resource (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    class TEXT NOT NULL,
    key TEXT,
    title TEXT NOT NULL,
    path TEXT NOT NULL CHECK (path = lower(path)),
    method TEXT NOT NULL,
    resource_type_id INTEGER NOT NULL REFERENCES resource_type(id),
    handler TEXT NOT NULL,
    reservation TEXT NOT NULL CHECK (reservation IN ('single', 'tree')),
    link_id INTEGER REFERENCES link(id) ON DELETE SET NULL,
    settings TEXT NOT NULL DEFAULT '{}',
    UNIQUE(class, key)
);
CREATE INDEX IF NOT EXISTS resource_path ON resource(path);

CREATE TABLE IF NOT EXISTS request_handler_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL CHECK (path = lower(path)),
    method TEXT NOT NULL,
    handler TEXT NOT NULL,
    owner_type_id INTEGER NOT NULL,
    owner_id INTEGER NOT NULL,
    UNIQUE(path, method)
);
CREATE INDEX IF NOT EXISTS request_handler_mapping_owner
    ON request_handler_mapping(owner_type_id, owner_id);

CREATE TABLE IF NOT EXISTS reserved_path (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE CHECK (path = lower(path)),
    reservation TEXT NOT NULL CHECK (reservation IN ('single', 'tree')),
    owner_type_id INTEGER NOT NULL,
    owner_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS reserved_path_owner ON reserved_path(owner_type_id, owner_id);

CREATE TABLE IF NOT EXISTS arrangement (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE,
    title TEXT NOT NULL,
    arrangement_type_id INTEGER NOT NULL REFERENCES resource_type(id)
);

CREATE TABLE IF NOT EXISTS site_content (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    arrangement_type_id INTEGER REFERENCES resource_type(id)
);

CREATE TABLE IF NOT EXISTS copy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS menu (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS menu_link (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    menu_id INTEGER NOT NULL REFERENCES menu(id) ON DELETE CASCADE,
    link_id INTEGER NOT NULL REFERENCES link(id) ON DELETE CASCADE,
    ord INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS file (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    alt TEXT NOT NULL DEFAULT '',
    caption TEXT NOT NULL DEFAULT '',
    link_url TEXT NOT NULL DEFAULT '',
    folder TEXT NOT NULL DEFAULT '',
    width INTEGER NOT NULL,
    height INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS image_type (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    content_type_id INTEGER NOT NULL REFERENCES content_type(id)
);

CREATE TABLE IF NOT EXISTS image_variant (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_type_id INTEGER NOT NULL REFERENCES image_type(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    algorithm TEXT NOT NULL CHECK (algorithm IN ('thumbnail', 'crop', 'crop_and_scale')),
    arguments TEXT NOT NULL,
    jit_generation INTEGER NOT NULL DEFAULT 0,
    UNIQUE(image_type_id, key)
);

CREATE TABLE IF NOT EXISTS content_slot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    owner_type_id INTEGER NOT NULL,
    owner_id INTEGER NOT NULL,
    ord INTEGER NOT NULL DEFAULT 0,
    key TEXT NOT NULL DEFAULT '',
    ref_id INTEGER,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS content_slot_owner
    ON content_slot(owner_type_id, owner_id, kind, key);
CREATE INDEX IF NOT EXISTS content_slot_ref ON content_slot(kind, ref_id);
";
