//! Plain content records: copy, arrangements, site content and files.
//!
//! Arrangements and site content own slots like resources do but are never
//! routed; copy and files are slot payloads.

use crate::resource_type::ResourceTypeId;
use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub id: i64,
    pub key: Option<String>,
    pub title: String,
    /// Markdown source.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrangement {
    pub id: i64,
    pub key: Option<String>,
    pub title: String,
    pub arrangement_type_id: ResourceTypeId,
}

/// Sitewide content reachable as `site.<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContent {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub arrangement_type_id: Option<ResourceTypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub title: String,
    /// Relative to the media root.
    pub path: String,
}

fn blank_to_none(key: Option<&str>) -> Option<String> {
    key.map(str::trim).filter(|k| !k.is_empty()).map(str::to_string)
}

// =============================================================================
// Copy
// =============================================================================

fn row_to_copy(row: &rusqlite::Row<'_>) -> rusqlite::Result<CopyRecord> {
    Ok(CopyRecord {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
    })
}

/// Create a copy record, or rewrite the one already holding `key`.
pub fn save_copy(
    conn: &Connection,
    key: Option<&str>,
    title: &str,
    body: &str,
) -> Result<CopyRecord, StoreError> {
    let key = blank_to_none(key);
    let existing = match &key {
        Some(k) => find_copy(conn, k)?,
        None => None,
    };
    let id = match existing {
        Some(found) => {
            conn.execute(
                "UPDATE copy SET title = ?2, body = ?3 WHERE id = ?1",
                params![found.id, title, body],
            )?;
            found.id
        }
        None => {
            conn.execute(
                "INSERT INTO copy (key, title, body) VALUES (?1, ?2, ?3)",
                params![key, title, body],
            )?;
            conn.last_insert_rowid()
        }
    };
    load_copy(conn, id)
}

pub fn load_copy(conn: &Connection, id: i64) -> Result<CopyRecord, StoreError> {
    conn.query_row(
        "SELECT id, key, title, body FROM copy WHERE id = ?1",
        params![id],
        row_to_copy,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("copy", id))
}

pub fn find_copy(conn: &Connection, key: &str) -> Result<Option<CopyRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, key, title, body FROM copy WHERE key = ?1",
            params![key],
            row_to_copy,
        )
        .optional()?)
}

pub fn delete_copy(conn: &Connection, id: i64) -> Result<(), StoreError> {
    if conn.execute("DELETE FROM copy WHERE id = ?1", params![id])? == 0 {
        return Err(StoreError::not_found("copy", id));
    }
    Ok(())
}

// =============================================================================
// Arrangements
// =============================================================================

fn row_to_arrangement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Arrangement> {
    Ok(Arrangement {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        arrangement_type_id: row.get(3)?,
    })
}

pub fn create_arrangement(
    conn: &Connection,
    key: Option<&str>,
    title: &str,
    arrangement_type_id: ResourceTypeId,
) -> Result<Arrangement, StoreError> {
    conn.execute(
        "INSERT INTO arrangement (key, title, arrangement_type_id) VALUES (?1, ?2, ?3)",
        params![blank_to_none(key), title, arrangement_type_id],
    )?;
    load_arrangement(conn, conn.last_insert_rowid())
}

pub fn load_arrangement(conn: &Connection, id: i64) -> Result<Arrangement, StoreError> {
    conn.query_row(
        "SELECT id, key, title, arrangement_type_id FROM arrangement WHERE id = ?1",
        params![id],
        row_to_arrangement,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("arrangement", id))
}

pub fn find_arrangement(conn: &Connection, key: &str) -> Result<Option<Arrangement>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, key, title, arrangement_type_id FROM arrangement WHERE key = ?1",
            params![key],
            row_to_arrangement,
        )
        .optional()?)
}

/// Delete the row only; slot cleanup is the caller's job.
pub fn delete_arrangement(conn: &Connection, id: i64) -> Result<(), StoreError> {
    if conn.execute("DELETE FROM arrangement WHERE id = ?1", params![id])? == 0 {
        return Err(StoreError::not_found("arrangement", id));
    }
    Ok(())
}

// =============================================================================
// Site content
// =============================================================================

fn row_to_site_content(row: &rusqlite::Row<'_>) -> rusqlite::Result<SiteContent> {
    Ok(SiteContent {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        arrangement_type_id: row.get(3)?,
    })
}

/// Get-or-create the site content `key`; an existing row keeps its id and
/// takes the new title and type.
pub fn save_site_content(
    conn: &Connection,
    key: &str,
    title: &str,
    arrangement_type_id: Option<ResourceTypeId>,
) -> Result<SiteContent, StoreError> {
    conn.execute(
        "INSERT INTO site_content (key, title, arrangement_type_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET title = excluded.title,
             arrangement_type_id = excluded.arrangement_type_id",
        params![key.trim(), title, arrangement_type_id],
    )?;
    find_site_content(conn, key.trim())?.ok_or_else(|| StoreError::not_found("site content", key))
}

pub fn load_site_content(conn: &Connection, id: i64) -> Result<SiteContent, StoreError> {
    conn.query_row(
        "SELECT id, key, title, arrangement_type_id FROM site_content WHERE id = ?1",
        params![id],
        row_to_site_content,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("site content", id))
}

pub fn find_site_content(conn: &Connection, key: &str) -> Result<Option<SiteContent>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, key, title, arrangement_type_id FROM site_content WHERE key = ?1",
            params![key],
            row_to_site_content,
        )
        .optional()?)
}

// =============================================================================
// Files
// =============================================================================

pub fn create_file(conn: &Connection, title: &str, path: &str) -> Result<FileRecord, StoreError> {
    conn.execute(
        "INSERT INTO file (title, path) VALUES (?1, ?2)",
        params![title, path],
    )?;
    load_file(conn, conn.last_insert_rowid())
}

pub fn load_file(conn: &Connection, id: i64) -> Result<FileRecord, StoreError> {
    conn.query_row(
        "SELECT id, title, path FROM file WHERE id = ?1",
        params![id],
        |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                title: row.get(1)?,
                path: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("file", id))
}

pub fn delete_file(conn: &Connection, id: i64) -> Result<FileRecord, StoreError> {
    let file = load_file(conn, id)?;
    conn.execute("DELETE FROM file WHERE id = ?1", params![id])?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_type::{TypeSpec, save_type};
    use crate::store::Store;

    #[test]
    fn keyed_copy_is_rewritten_in_place() {
        let store = Store::open_in_memory().unwrap();
        let (a, b) = store
            .write(|tx| {
                let a = save_copy(tx, Some("lead"), "Lead", "one")?;
                let b = save_copy(tx, Some("lead"), "Lead", "two")?;
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.body, "two");
    }

    #[test]
    fn unkeyed_copies_are_distinct() {
        let store = Store::open_in_memory().unwrap();
        let (a, b) = store
            .write(|tx| Ok((save_copy(tx, None, "", "x")?, save_copy(tx, Some("  "), "", "y")?)))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.key, None);
    }

    #[test]
    fn arrangement_lookup_by_key() {
        let store = Store::open_in_memory().unwrap();
        let found = store
            .write(|tx| {
                let ty = save_type(tx, &TypeSpec::arrangement("body"))?;
                create_arrangement(tx, Some("home-body"), "Home body", ty.id)?;
                find_arrangement(tx, "home-body")
            })
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "Home body");
    }

    #[test]
    fn site_content_is_get_or_create() {
        let store = Store::open_in_memory().unwrap();
        let (a, b) = store
            .write(|tx| {
                Ok((
                    save_site_content(tx, "footer", "Footer", None)?,
                    save_site_content(tx, "footer", "Site footer", None)?,
                ))
            })
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.title, "Site footer");
    }

    #[test]
    fn missing_rows_are_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.read(|c| load_file(c, 4)).unwrap_err(),
            StoreError::NotFound { what: "file", .. }
        ));
        assert!(store.write(|tx| delete_arrangement(tx, 4)).is_err());
    }
}
