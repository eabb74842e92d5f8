//! Named callables: middleware, response processors, handlers, validators.
//!
//! Stored mappings (resource type → middleware, resource → handler, schema
//! member → validator) refer to functions by title. The process-wide
//! [`FunctionRegistry`] resolves those titles to Rust closures; at seed time
//! every registered title is mirrored into the `function` table so mapping
//! rows have something to reference.

use crate::atoms::MenuObject;
use crate::menu;
use crate::pipeline::{self, PipelineError};
use crate::resource::Resource;
use crate::resource_type::ResourceTypeId;
use crate::site::{Env, Site};
use crate::slots::Payload;
use crate::store::StoreError;
use crate::templates::Template;
use crate::templates::value::{Context, Value};
use crate::types::Response;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub type Middleware = Arc<
    dyn Fn(&Env<'_>, &mut Context, &Resource, &Template) -> Result<(), PipelineError> + Send + Sync,
>;
pub type ResponseProcessor = Arc<
    dyn Fn(&Env<'_>, &Context, &Resource, &Template, &mut Response) -> Result<(), PipelineError>
        + Send
        + Sync,
>;
pub type Handler = Arc<dyn Fn(&Env<'_>, &Resource) -> Result<Response, PipelineError> + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Payload) -> Result<(), String> + Send + Sync>;

pub const RENDER: &str = "swim.render";
pub const REDIRECT: &str = "swim.redirect";
pub const MENUS: &str = "swim.menus";
pub const ETAG: &str = "swim.etag";
pub const NON_EMPTY: &str = "swim.non_empty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Middleware,
    ResponseProcessor,
    Handler,
    Validator,
}

impl FunctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Middleware => "middleware",
            FunctionKind::ResponseProcessor => "response_processor",
            FunctionKind::Handler => "handler",
            FunctionKind::Validator => "validator",
        }
    }
}

#[derive(Clone)]
enum Function {
    Middleware(Middleware),
    ResponseProcessor(ResponseProcessor),
    Handler(Handler),
    Validator(Validator),
}

impl Function {
    fn kind(&self) -> FunctionKind {
        match self {
            Function::Middleware(_) => FunctionKind::Middleware,
            Function::ResponseProcessor(_) => FunctionKind::ResponseProcessor,
            Function::Handler(_) => FunctionKind::Handler,
            Function::Validator(_) => FunctionKind::Validator,
        }
    }
}

/// Title → callable. Registering a title twice replaces the earlier entry.
#[derive(Default)]
pub struct FunctionRegistry {
    entries: RwLock<HashMap<String, Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `swim.*` built-ins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_handler(RENDER, pipeline::render_resource);
        registry.register_handler(REDIRECT, redirect_handler);
        registry.register_middleware(MENUS, menus_middleware);
        registry.register_response_processor(ETAG, etag_processor);
        registry.register_validator(NON_EMPTY, non_empty_validator);
        registry
    }

    fn insert(&self, title: &str, function: Function) {
        debug!(title, kind = function.kind().as_str(), "registering function");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(title.to_string(), function);
    }

    fn get(&self, title: &str) -> Option<Function> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(title)
            .cloned()
    }

    pub fn register_middleware<F>(&self, title: &str, f: F)
    where
        F: Fn(&Env<'_>, &mut Context, &Resource, &Template) -> Result<(), PipelineError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(title, Function::Middleware(Arc::new(f)));
    }

    pub fn register_response_processor<F>(&self, title: &str, f: F)
    where
        F: Fn(&Env<'_>, &Context, &Resource, &Template, &mut Response) -> Result<(), PipelineError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(title, Function::ResponseProcessor(Arc::new(f)));
    }

    pub fn register_handler<F>(&self, title: &str, f: F)
    where
        F: Fn(&Env<'_>, &Resource) -> Result<Response, PipelineError> + Send + Sync + 'static,
    {
        self.insert(title, Function::Handler(Arc::new(f)));
    }

    pub fn register_validator<F>(&self, title: &str, f: F)
    where
        F: Fn(&Payload) -> Result<(), String> + Send + Sync + 'static,
    {
        self.insert(title, Function::Validator(Arc::new(f)));
    }

    pub fn middleware(&self, title: &str) -> Option<Middleware> {
        match self.get(title)? {
            Function::Middleware(f) => Some(f),
            _ => None,
        }
    }

    pub fn response_processor(&self, title: &str) -> Option<ResponseProcessor> {
        match self.get(title)? {
            Function::ResponseProcessor(f) => Some(f),
            _ => None,
        }
    }

    pub fn handler(&self, title: &str) -> Option<Handler> {
        match self.get(title)? {
            Function::Handler(f) => Some(f),
            _ => None,
        }
    }

    pub fn validator(&self, title: &str) -> Option<Validator> {
        match self.get(title)? {
            Function::Validator(f) => Some(f),
            _ => None,
        }
    }

    /// Registered titles with their kinds, sorted by title.
    pub fn titles(&self) -> Vec<(String, FunctionKind)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = entries
            .iter()
            .map(|(title, f)| (title.clone(), f.kind()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Mirror every registered title into the `function` table.
    pub fn sync_rows(&self, conn: &Connection) -> Result<usize, StoreError> {
        let titles = self.titles();
        for (title, kind) in &titles {
            function_row(conn, title, *kind)?;
        }
        Ok(titles.len())
    }
}

/// Get-or-create the `function` row for `title`.
pub fn function_row(conn: &Connection, title: &str, kind: FunctionKind) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO function (title, kind) VALUES (?1, ?2)
         ON CONFLICT(title) DO UPDATE SET kind = excluded.kind",
        params![title, kind.as_str()],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM function WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )?)
}

/// Functions a resource type runs around rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Middleware,
    ResponseProcessor,
}

impl Hook {
    fn table(self) -> &'static str {
        match self {
            Hook::Middleware => "resource_type_middleware",
            Hook::ResponseProcessor => "resource_type_response_processor",
        }
    }

    fn kind(self) -> FunctionKind {
        match self {
            Hook::Middleware => FunctionKind::Middleware,
            Hook::ResponseProcessor => FunctionKind::ResponseProcessor,
        }
    }
}

/// Attach `title` to `type_id`; attaching again only moves it to `order`.
pub fn attach(
    conn: &Connection,
    hook: Hook,
    type_id: ResourceTypeId,
    title: &str,
    order: i64,
) -> Result<(), StoreError> {
    let function_id = function_row(conn, title, hook.kind())?;
    conn.execute(
        &format!(
            "INSERT INTO {} (resource_type_id, function_id, ord) VALUES (?1, ?2, ?3)
             ON CONFLICT(resource_type_id, function_id) DO UPDATE SET ord = excluded.ord",
            hook.table()
        ),
        params![type_id, function_id, order],
    )?;
    Ok(())
}

pub fn detach(conn: &Connection, hook: Hook, type_id: ResourceTypeId, title: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        &format!(
            "DELETE FROM {} WHERE resource_type_id = ?1
             AND function_id = (SELECT id FROM function WHERE title = ?2)",
            hook.table()
        ),
        params![type_id, title],
    )?)
}

/// Titles attached directly to `type_id`, in order.
pub fn attached(conn: &Connection, hook: Hook, type_id: ResourceTypeId) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT f.title FROM {} h JOIN function f ON f.id = h.function_id
         WHERE h.resource_type_id = ?1 ORDER BY h.ord, h.id",
        hook.table()
    ))?;
    let titles = stmt
        .query_map(params![type_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(titles)
}

impl Site {
    /// Attach a registered middleware or response processor to a type.
    pub fn attach(&self, hook: Hook, type_id: ResourceTypeId, title: &str, order: i64) -> Result<(), StoreError> {
        let registered = match hook {
            Hook::Middleware => self.functions.middleware(title).is_some(),
            Hook::ResponseProcessor => self.functions.response_processor(title).is_some(),
        };
        if !registered {
            return Err(StoreError::Invalid(format!(
                "no {} registered as '{title}'",
                hook.kind().as_str()
            )));
        }
        self.store.write(|tx| attach(tx, hook, type_id, title, order))
    }
}

// =============================================================================
// Built-ins
// =============================================================================

/// 302 to the resource's `redirect` setting.
///
/// On POST, every field named in the `required` setting must be present and
/// non-blank in the form body, otherwise the answer is a 400.
fn redirect_handler(env: &Env<'_>, resource: &Resource) -> Result<Response, PipelineError> {
    let target = resource
        .setting_str("redirect")
        .ok_or_else(|| PipelineError::Internal(format!("{} has no redirect setting", resource.path)))?;

    if env.request.method == "POST" {
        let form = env.request.form();
        let missing: Vec<&str> = resource
            .settings
            .get("required")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .filter(|field| form.get(*field).is_none_or(|v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Ok(Response::text(
                400,
                &format!("Missing required fields: {}", missing.join(", ")),
            ));
        }
    }
    Ok(Response::redirect(302, target))
}

/// Install `menus`: every menu keyed by its key.
fn menus_middleware(
    env: &Env<'_>,
    ctx: &mut Context,
    _resource: &Resource,
    _template: &Template,
) -> Result<(), PipelineError> {
    let menus = env.site.store.read(menu::all_menus)?;
    let map: BTreeMap<String, Value> = menus
        .into_iter()
        .map(|m| (m.key.clone(), Value::Object(Rc::new(MenuObject::new(m)))))
        .collect();
    ctx.insert_root("menus", Value::Map(map));
    Ok(())
}

/// Strong `ETag` over the body of successful responses; honours `If-None-Match`.
fn etag_processor(
    env: &Env<'_>,
    _ctx: &Context,
    _resource: &Resource,
    _template: &Template,
    response: &mut Response,
) -> Result<(), PipelineError> {
    if response.status != 200 {
        return Ok(());
    }
    let tag = format!("\"{}\"", hex_digest(&response.body));
    if env.request.header("if-none-match") == Some(tag.as_str()) {
        response.status = 304;
        response.body.clear();
    }
    response.set_header("ETag", &tag);
    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn non_empty_validator(payload: &Payload) -> Result<(), String> {
    if payload.is_blank() {
        Err("a value is required".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn builtins_are_registered_by_kind() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.handler(RENDER).is_some());
        assert!(registry.handler(REDIRECT).is_some());
        assert!(registry.middleware(MENUS).is_some());
        assert!(registry.response_processor(ETAG).is_some());
        assert!(registry.validator(NON_EMPTY).is_some());
    }

    #[test]
    fn lookup_with_wrong_kind_is_none() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.middleware(RENDER).is_none());
        assert!(registry.handler(MENUS).is_none());
        assert!(registry.validator("nope").is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let registry = FunctionRegistry::new();
        registry.register_validator("v", |_| Err("first".into()));
        registry.register_validator("v", |_| Ok(()));
        let v = registry.validator("v").unwrap();
        assert!(v(&Payload::Integer(1)).is_ok());
        assert_eq!(registry.titles().len(), 1);
    }

    #[test]
    fn sync_rows_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let registry = FunctionRegistry::with_builtins();
        store.write(|tx| registry.sync_rows(tx)).unwrap();
        store.write(|tx| registry.sync_rows(tx)).unwrap();
        let count: i64 = store
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM function", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn non_empty_rejects_blank_copy() {
        assert!(non_empty_validator(&Payload::copy("  ")).is_err());
        assert!(non_empty_validator(&Payload::copy("hello")).is_ok());
        assert!(non_empty_validator(&Payload::Integer(0)).is_ok());
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let d = hex_digest(b"abc");
        assert_eq!(d.len(), 64);
        assert!(d.starts_with("ba7816bf"));
    }

    #[test]
    fn attached_hooks_keep_order_and_reattach_moves() {
        let store = Store::open_in_memory().unwrap();
        let titles = store
            .write(|tx| {
                let ty = crate::resource_type::save_type(tx, &crate::resource_type::TypeSpec::resource("t"))?;
                attach(tx, Hook::Middleware, ty.id, "b", 1)?;
                attach(tx, Hook::Middleware, ty.id, "a", 2)?;
                attach(tx, Hook::Middleware, ty.id, "b", 3)?;
                attach(tx, Hook::ResponseProcessor, ty.id, ETAG, 0)?;
                attached(tx, Hook::Middleware, ty.id)
            })
            .unwrap();
        assert_eq!(titles, ["a", "b"]);
    }
}
