//! `(path, method)` → handler resolution.

use crate::content_type::OwnerRef;
use crate::naming::canonical_path;
use crate::store::StoreError;
use rusqlite::{Connection, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerMapping {
    pub id: i64,
    pub path: String,
    pub method: String,
    /// Function title.
    pub handler: String,
    pub owner: OwnerRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(HandlerMapping),
    /// The path is known but was requested in another spelling.
    Redirect(String),
    /// The path is known under these methods only.
    MethodNotAllowed(Vec<String>),
    NotFound,
}

fn mappings_where(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<HandlerMapping>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, path, method, handler, owner_type_id, owner_id
         FROM request_handler_mapping WHERE {filter} ORDER BY path, method"
    ))?;
    let rows = stmt
        .query_map(args, |row| {
            Ok(HandlerMapping {
                id: row.get(0)?,
                path: row.get(1)?,
                method: row.get(2)?,
                handler: row.get(3)?,
                owner: OwnerRef::new(row.get(4)?, row.get(5)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Resolve a request line.
///
/// `path` is the raw request path; anything other than its canonical form
/// (lower-case, normalized slashes) redirects once the canonical path is
/// known to exist.
pub fn resolve(conn: &Connection, path: &str, method: &str) -> Result<Resolution, StoreError> {
    let canonical = canonical_path(path);
    let known = mappings_where(conn, "path = ?1", &[&canonical])?;
    if known.is_empty() {
        return Ok(Resolution::NotFound);
    }
    if path != canonical {
        return Ok(Resolution::Redirect(canonical));
    }
    let method = method.to_ascii_uppercase();
    if let Some(found) = known.iter().find(|m| m.method == method) {
        return Ok(Resolution::Found(found.clone()));
    }
    Ok(Resolution::MethodNotAllowed(
        known.into_iter().map(|m| m.method).collect(),
    ))
}

/// Insert the mapping for `owner`. A taken `(path, method)` is a
/// [`StoreError::Conflict`].
pub fn put_mapping(
    conn: &Connection,
    path: &str,
    method: &str,
    handler: &str,
    owner: OwnerRef,
) -> Result<HandlerMapping, StoreError> {
    let path = canonical_path(path);
    let method = method.to_ascii_uppercase();
    conn.execute(
        "INSERT INTO request_handler_mapping (path, method, handler, owner_type_id, owner_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![path, method, handler, owner.type_id, owner.id],
    )?;
    Ok(HandlerMapping {
        id: conn.last_insert_rowid(),
        path,
        method,
        handler: handler.to_string(),
        owner,
    })
}

pub fn remove_mappings(conn: &Connection, owner: OwnerRef) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM request_handler_mapping WHERE owner_type_id = ?1 AND owner_id = ?2",
        params![owner.type_id, owner.id],
    )?)
}

pub fn mappings_of(conn: &Connection, owner: OwnerRef) -> Result<Vec<HandlerMapping>, StoreError> {
    mappings_where(
        conn,
        "owner_type_id = ?1 AND owner_id = ?2",
        &[&owner.type_id, &owner.id],
    )
}

/// The whole table, ordered by path then method.
pub fn all_mappings(conn: &Connection) -> Result<Vec<HandlerMapping>, StoreError> {
    mappings_where(conn, "1 = 1", &[])
}
