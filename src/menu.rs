//! Menus, their ordered links, and the links themselves.
//!
//! A link is a title and a URL. Every resource owns one whose URL follows its
//! path, so a menu listing those links can be turned back into resources.

use crate::resource::{Resource, resources_by_link};
use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub id: i64,
    pub key: String,
    pub title: String,
}

fn row_to_menu(row: &rusqlite::Row<'_>) -> rusqlite::Result<Menu> {
    Ok(Menu {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
    })
}

/// Get-or-create the menu `key`.
pub fn create_menu(conn: &Connection, key: &str, title: &str) -> Result<Menu, StoreError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::Invalid("menu key must not be empty".into()));
    }
    conn.execute(
        "INSERT OR IGNORE INTO menu (key, title) VALUES (?1, ?2)",
        params![key, title],
    )?;
    find_menu(conn, key)?.ok_or_else(|| StoreError::not_found("menu", key))
}

pub fn load_menu(conn: &Connection, id: i64) -> Result<Menu, StoreError> {
    conn.query_row(
        "SELECT id, key, title FROM menu WHERE id = ?1",
        params![id],
        row_to_menu,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("menu", id))
}

pub fn find_menu(conn: &Connection, key: &str) -> Result<Option<Menu>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, key, title FROM menu WHERE key = ?1",
            params![key],
            row_to_menu,
        )
        .optional()?)
}

pub fn all_menus(conn: &Connection) -> Result<Vec<Menu>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, key, title FROM menu ORDER BY key")?;
    let menus = stmt
        .query_map([], row_to_menu)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(menus)
}

pub fn delete_menu(conn: &Connection, id: i64) -> Result<(), StoreError> {
    if conn.execute("DELETE FROM menu WHERE id = ?1", params![id])? == 0 {
        return Err(StoreError::not_found("menu", id));
    }
    Ok(())
}

pub fn create_link(conn: &Connection, title: &str, url: &str) -> Result<Link, StoreError> {
    conn.execute(
        "INSERT INTO link (title, url) VALUES (?1, ?2)",
        params![title, url],
    )?;
    Ok(Link {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        url: url.to_string(),
    })
}

pub fn update_link(conn: &Connection, id: i64, title: &str, url: &str) -> Result<(), StoreError> {
    if conn.execute(
        "UPDATE link SET title = ?2, url = ?3 WHERE id = ?1",
        params![id, title, url],
    )? == 0
    {
        return Err(StoreError::not_found("link", id));
    }
    Ok(())
}

pub fn load_link(conn: &Connection, id: i64) -> Result<Link, StoreError> {
    conn.query_row(
        "SELECT id, title, url FROM link WHERE id = ?1",
        params![id],
        |row| {
            Ok(Link {
                id: row.get(0)?,
                title: row.get(1)?,
                url: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found("link", id))
}

/// Delete a link. Menu entries pointing at it go with it; a resource whose
/// own link this was keeps existing without one.
pub fn delete_link(conn: &Connection, id: i64) -> Result<(), StoreError> {
    if conn.execute("DELETE FROM link WHERE id = ?1", params![id])? == 0 {
        return Err(StoreError::not_found("link", id));
    }
    Ok(())
}

/// Append `link_id` to `menu_id` at `order`; returns the menu link id.
pub fn add_link(conn: &Connection, menu_id: i64, link_id: i64, order: i64) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO menu_link (menu_id, link_id, ord) VALUES (?1, ?2, ?3)",
        params![menu_id, link_id, order],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn remove_menu_link(conn: &Connection, menu_link_id: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM menu_link WHERE id = ?1", params![menu_link_id])?;
    Ok(())
}

/// Links of a menu in menu order (ties by insertion).
pub fn menu_links(conn: &Connection, menu_id: i64) -> Result<Vec<Link>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.title, l.url FROM menu_link ml
         JOIN link l ON l.id = ml.link_id
         WHERE ml.menu_id = ?1
         ORDER BY ml.ord, ml.id",
    )?;
    let links = stmt
        .query_map(params![menu_id], |row| {
            Ok(Link {
                id: row.get(0)?,
                title: row.get(1)?,
                url: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(links)
}

/// Resources whose own link appears in the menu, in menu order.
pub fn menu_resources(conn: &Connection, menu_id: i64) -> Result<Vec<Resource>, StoreError> {
    let ids: Vec<i64> = menu_links(conn, menu_id)?.iter().map(|l| l.id).collect();
    resources_by_link(conn, &ids)
}
