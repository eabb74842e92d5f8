//! Template rows, type mappings, and memoized template choice.

use super::negotiate::{Candidate, parse_accept, pick, visible};
use super::{ChooseError, Template, TemplateSpec};
use crate::cache::ChoiceKey;
use crate::content_type;
use crate::naming::normalize_path;
use crate::resource_type::{ResourceTypeId, cached_chain};
use crate::site::Env;
use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::rc::Rc;
use tracing::debug;

/// Stored template paths are lower-case and carry no leading slash.
fn template_path(path: &str) -> String {
    normalize_path(path).trim_start_matches('/').to_lowercase()
}

const TEMPLATE_COLUMNS: &str = "t.id, t.path, t.mime, t.payload_type_id, ct.title, t.body
    FROM template t JOIN content_type ct ON ct.id = t.payload_type_id";

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        path: row.get(1)?,
        mime: row.get(2)?,
        payload_type_id: row.get(3)?,
        payload_type: row.get(4)?,
        body: row.get(5)?,
        hosts: Vec::new(),
    })
}

fn hosts_of(conn: &Connection, template_id: i64) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT host FROM template_host WHERE template_id = ?1 ORDER BY host")?;
    let hosts = stmt
        .query_map(params![template_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(hosts)
}

fn with_hosts(conn: &Connection, mut template: Template) -> Result<Template, StoreError> {
    template.hosts = hosts_of(conn, template.id)?;
    Ok(template)
}

/// Create or update the template keyed by `(path, mime, payload type)`.
///
/// The body is replaced and the host set rewritten on every save.
pub fn save_template(conn: &Connection, spec: &TemplateSpec) -> Result<Template, StoreError> {
    let path = template_path(&spec.path);
    if path.is_empty() {
        return Err(StoreError::Invalid("template path must not be empty".into()));
    }
    let parametric = spec.payload_type.contains(':');
    let payload_type_id = content_type::get_or_create(conn, &spec.payload_type, parametric)?;
    conn.execute(
        "INSERT INTO template (path, mime, payload_type_id, body) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(path, mime, payload_type_id) DO UPDATE SET body = excluded.body",
        params![path, spec.mime, payload_type_id, spec.body],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM template WHERE path = ?1 AND mime = ?2 AND payload_type_id = ?3",
        params![path, spec.mime, payload_type_id],
        |row| row.get(0),
    )?;
    conn.execute("DELETE FROM template_host WHERE template_id = ?1", params![id])?;
    for host in &spec.hosts {
        conn.execute(
            "INSERT OR IGNORE INTO template_host (template_id, host) VALUES (?1, ?2)",
            params![id, host.trim().to_ascii_lowercase()],
        )?;
    }
    load_template(conn, id)
}

pub fn load_template(conn: &Connection, id: i64) -> Result<Template, StoreError> {
    let template = conn
        .query_row(
            &format!("SELECT {TEMPLATE_COLUMNS} WHERE t.id = ?1"),
            params![id],
            row_to_template,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found("template", id))?;
    with_hosts(conn, template)
}

pub fn delete_template(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let n = conn.execute("DELETE FROM template WHERE id = ?1", params![id])?;
    if n == 0 {
        return Err(StoreError::not_found("template", id));
    }
    Ok(())
}

/// Template at `path` producing `mime`, for `extends` / `include`.
///
/// Any payload type qualifies; the oldest row wins.
pub fn find_by_path(conn: &Connection, path: &str, mime: &str) -> Result<Option<Template>, StoreError> {
    conn.query_row(
        &format!("SELECT {TEMPLATE_COLUMNS} WHERE t.path = ?1 AND t.mime = ?2 ORDER BY t.id LIMIT 1"),
        params![template_path(path), mime],
        row_to_template,
    )
    .optional()?
    .map(|t| with_hosts(conn, t))
    .transpose()
}

pub fn all_templates(conn: &Connection) -> Result<Vec<Template>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {TEMPLATE_COLUMNS} ORDER BY t.path, t.mime"))?;
    let rows = stmt
        .query_map([], row_to_template)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|t| with_hosts(conn, t)).collect()
}

/// Map `template_id` to `type_id` at `order`; re-mapping updates the order.
pub fn map_template(
    conn: &Connection,
    type_id: ResourceTypeId,
    template_id: i64,
    order: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO resource_type_template (resource_type_id, template_id, ord) VALUES (?1, ?2, ?3)
         ON CONFLICT(resource_type_id, template_id) DO UPDATE SET ord = excluded.ord",
        params![type_id, template_id, order],
    )?;
    Ok(())
}

pub fn unmap_template(
    conn: &Connection,
    type_id: ResourceTypeId,
    template_id: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM resource_type_template WHERE resource_type_id = ?1 AND template_id = ?2",
        params![type_id, template_id],
    )?;
    Ok(())
}

/// Templates mapped directly to `type_id` for `payload_type`, in mapping order.
pub fn mapped_candidates(
    conn: &Connection,
    type_id: ResourceTypeId,
    payload_type: &str,
) -> Result<Vec<Candidate>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.path, t.mime, t.payload_type_id, ct.title, t.body, m.ord
         FROM template t
         JOIN content_type ct ON ct.id = t.payload_type_id
         JOIN resource_type_template m ON m.template_id = t.id
         WHERE m.resource_type_id = ?1 AND ct.title = ?2
         ORDER BY m.ord, m.id",
    )?;
    let rows = stmt
        .query_map(params![type_id, payload_type], |row| {
            Ok((row_to_template(row)?, row.get::<_, i64>(6)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(t, order)| {
            Ok(Candidate {
                template: Rc::new(with_hosts(conn, t)?),
                order,
            })
        })
        .collect()
}

/// Every template mapped directly to `type_id`, in mapping order.
pub fn mapped_templates(conn: &Connection, type_id: ResourceTypeId) -> Result<Vec<Template>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TEMPLATE_COLUMNS} JOIN resource_type_template m ON m.template_id = t.id
         WHERE m.resource_type_id = ?1 ORDER BY m.ord, m.id"
    ))?;
    let rows = stmt
        .query_map(params![type_id], row_to_template)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|t| with_hosts(conn, t)).collect()
}

/// Choose the template rendering `payload_type` for a resource of `type_id`.
///
/// The outer `Result` is a store failure; the inner one is the negotiation
/// outcome, remembered for the rest of the request either way.
pub fn choose_template(
    env: &Env<'_>,
    type_id: ResourceTypeId,
    payload_type: &str,
    accept: Option<&str>,
    host: Option<&str>,
) -> Result<Result<Rc<Template>, ChooseError>, StoreError> {
    let settings = &env.site.config.templates;
    let host = host
        .filter(|_| settings.per_host)
        .map(|h| h.to_ascii_lowercase());
    let key = ChoiceKey {
        type_id,
        payload_type: payload_type.to_string(),
        accept: accept.unwrap_or_default().to_string(),
        host: host.clone(),
    };
    env.cache.choice(key, || {
        let ranges = match accept {
            None if !settings.accept_fallback_first => parse_accept(Some("text/html, */*;q=0.1")),
            other => parse_accept(other),
        };
        let chain = cached_chain(&env.site.store, env.cache, type_id)?;
        for &candidate_type in chain.iter() {
            let found = env
                .site
                .store
                .read(|conn| mapped_candidates(conn, candidate_type, payload_type))?;
            let candidates = visible(found, host.as_deref());
            if candidates.is_empty() {
                continue;
            }
            let choice = pick(&candidates, &ranges);
            match &choice {
                Ok(t) => debug!(type_id, candidate_type, payload_type, template = %t.path, mime = %t.mime, "template chosen"),
                Err(e) => debug!(type_id, candidate_type, payload_type, error = %e, "no acceptable template"),
            }
            return Ok(choice);
        }
        Ok(Err(ChooseError::NoTemplate))
    })
}
