//! Content type catalog.
//!
//! Two populations of `content_type` rows exist side by side:
//!
//! - **Class types**, one per entity or payload class (`page`, `copy`,
//!   `image`, ...). Their titles are constants, so ids are cached for the
//!   life of the process in a [`ClassRegistry`].
//! - **Parametric types**, one per saved instance of a parametric type
//!   (`resource_type:<key>`, `arrangement_type:<key>`, `image_type:<key>`).
//!   These are created when the instance is saved and looked up through the
//!   database.
//!
//! The `parametric` column keeps the two apart without relying on title
//! patterns.

use crate::store::{Store, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub type ContentTypeId = i64;

/// Polymorphic reference to any stored entity: `(content type, row id)`.
///
/// Used uniformly by content slots, handler mappings and path reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub type_id: ContentTypeId,
    pub id: i64,
}

impl OwnerRef {
    pub fn new(type_id: ContentTypeId, id: i64) -> Self {
        Self { type_id, id }
    }
}

/// Class type titles.
pub mod class {
    pub const RESOURCE: &str = "resource";
    pub const PAGE: &str = "page";
    pub const ARRANGEMENT: &str = "arrangement";
    pub const SITE: &str = "site";
    pub const COPY: &str = "copy";
    pub const MENU: &str = "menu";
    pub const LINK: &str = "link";
    pub const FILE: &str = "file";
    pub const IMAGE: &str = "image";
    pub const DATE: &str = "date";
    pub const DATETIME: &str = "datetime";
    pub const TIME: &str = "time";
    pub const INSTANT: &str = "instant";
    pub const PERIOD: &str = "period";
    pub const INTEGER: &str = "integer";
    pub const ENUM: &str = "enum";
}

/// Every built-in class, in seeding order.
pub const CLASSES: &[&str] = &[
    class::RESOURCE,
    class::PAGE,
    class::ARRANGEMENT,
    class::SITE,
    class::COPY,
    class::MENU,
    class::LINK,
    class::FILE,
    class::IMAGE,
    class::DATE,
    class::DATETIME,
    class::TIME,
    class::INSTANT,
    class::PERIOD,
    class::INTEGER,
    class::ENUM,
];

pub fn resource_type_title(key: &str) -> String {
    format!("resource_type:{key}")
}

pub fn arrangement_type_title(key: &str) -> String {
    format!("arrangement_type:{key}")
}

pub fn image_type_title(key: &str) -> String {
    format!("image_type:{key}")
}

/// Get-or-create a content type row by title.
pub fn get_or_create(
    conn: &Connection,
    title: &str,
    parametric: bool,
) -> Result<ContentTypeId, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO content_type (title, parametric) VALUES (?1, ?2)",
        params![title, parametric],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM content_type WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )?)
}

pub fn find(conn: &Connection, title: &str) -> Result<Option<ContentTypeId>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM content_type WHERE title = ?1",
            params![title],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn title_of(conn: &Connection, id: ContentTypeId) -> Result<String, StoreError> {
    conn.query_row(
        "SELECT title FROM content_type WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("content type", id))
}

/// Process-scoped cache of class content type ids.
///
/// Class titles never change, so entries are never invalidated.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    ids: RwLock<HashMap<String, ContentTypeId>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached id for a class title, creating the row on first use.
    pub fn id(&self, store: &Store, title: &str) -> Result<ContentTypeId, StoreError> {
        if let Some(id) = self.cached(title) {
            return Ok(id);
        }
        let id = store.write(|tx| get_or_create(tx, title, false))?;
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(title.to_string(), id);
        Ok(id)
    }

    pub fn cached(&self, title: &str) -> Option<ContentTypeId> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(title)
            .copied()
    }

    /// Reverse lookup among cached classes.
    pub fn title_for(&self, id: ContentTypeId) -> Option<String> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.clone())
    }
}
