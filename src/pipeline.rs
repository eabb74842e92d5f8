//! Request handling: resolve, negotiate, render.
//!
//! ```text
//! Request ─▶ router ─┬─ 301 / 404 / 405
//!                    └─ handler(resource)
//!                          swim.render:
//!                            choose template ─▶ 406
//!                            middleware (child type first)
//!                            render
//!                            response processors
//! ```
//!
//! Every failure below the router is turned into a response here: a
//! [`PipelineError::NotFound`] from anywhere becomes a 404, anything else a
//! 500 rendered from the configured error template or a built-in page.

use crate::atoms::{ContentRoot, Entity, SiteRoot, request_value};
use crate::cache::RequestCache;
use crate::functions::{Hook, attached};
use crate::resource::{self, Resource};
use crate::resource_type::{ResourceTypeId, cached_chain};
use crate::router::{self, Resolution};
use crate::site::{Env, Site};
use crate::store::StoreError;
use crate::templates::value::{Context, Value};
use crate::templates::{self, ChooseError, Template, TemplateError, choose_template};
use crate::types::{Request, Response};
use maud::{DOCTYPE, html};
use std::collections::HashSet;
use std::fs;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Answer 404.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Answer one request. Never fails; errors become 404 or 500 responses.
pub fn handle(site: &Site, request: &Request) -> Response {
    let started = Instant::now();
    let cache = RequestCache::new();
    let env = Env {
        site,
        cache: &cache,
        request,
    };
    let response = match dispatch(&env) {
        Ok(response) => response,
        Err(PipelineError::NotFound(what)) => {
            debug!(path = %request.path, what = %what, "not found");
            Response::not_found()
        }
        Err(e) => {
            error!(method = %request.method, path = %request.path, error = %e, "request failed");
            internal_error(&env, &e)
        }
    };
    info!(
        method = %request.method,
        path = %request.path,
        status = response.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handled"
    );
    response
}

fn dispatch(env: &Env<'_>) -> Result<Response, PipelineError> {
    let request = env.request;
    let resolution = env
        .site
        .store
        .read(|conn| router::resolve(conn, &request.path, &request.method))?;
    match resolution {
        Resolution::NotFound => Err(PipelineError::NotFound(request.path.clone())),
        Resolution::Redirect(canonical) => {
            let location = match &request.query {
                Some(query) => format!("{canonical}?{query}"),
                None => canonical,
            };
            Ok(Response::redirect(301, &location))
        }
        Resolution::MethodNotAllowed(methods) => Ok(Response::method_not_allowed(&methods)),
        Resolution::Found(mapping) => {
            let handler = env.site.functions.handler(&mapping.handler).ok_or_else(|| {
                PipelineError::Internal(format!("no handler registered as '{}'", mapping.handler))
            })?;
            let resource = match env
                .site
                .store
                .read(|conn| resource::load_resource(conn, mapping.owner.id))
            {
                Ok(resource) => resource,
                Err(StoreError::NotFound { .. }) => {
                    return Err(PipelineError::NotFound(request.path.clone()));
                }
                Err(e) => return Err(e.into()),
            };
            debug!(resource = resource.id, handler = %mapping.handler, "dispatching");
            handler(env, &resource)
        }
    }
}

/// Titles hooked to `type_id` and its ancestors, child entries first, each once.
///
/// A title names exactly one registered function, so deduplicating titles
/// deduplicates functions.
fn hooks(env: &Env<'_>, hook: Hook, type_id: ResourceTypeId) -> Result<Rc<Vec<String>>, StoreError> {
    let load = || {
        let chain = cached_chain(&env.site.store, env.cache, type_id)?;
        env.site.store.read(|conn| {
            let mut seen = HashSet::new();
            let mut titles = Vec::new();
            for &ty in chain.iter() {
                for title in attached(conn, hook, ty)? {
                    if seen.insert(title.clone()) {
                        titles.push(title);
                    }
                }
            }
            Ok(Rc::new(titles))
        })
    };
    match hook {
        Hook::Middleware => env.cache.middleware(type_id, load),
        Hook::ResponseProcessor => env.cache.processors(type_id, load),
    }
}

/// The `swim.render` handler.
pub fn render_resource(env: &Env<'_>, resource: &Resource) -> Result<Response, PipelineError> {
    let type_id = resource.resource_type_id;
    let accept = env.request.accept();
    let host = env.request.host();
    let payload_type = &env.site.config.templates.default_payload_type;
    let chosen = match choose_template(env, type_id, payload_type, accept, host.as_deref())? {
        Ok(template) => template,
        Err(ChooseError::NotAcceptable { offered }) => {
            debug!(path = %resource.path, accept = ?accept, "not acceptable");
            return Ok(Response::not_acceptable(accept.unwrap_or("*/*"), &offered));
        }
        Err(ChooseError::NoTemplate) => {
            return Err(PipelineError::Internal(format!(
                "no '{payload_type}' template for the type of {}",
                resource.path
            )));
        }
    };
    let template: &Template = &chosen;

    let mut ctx = Context::new();
    let entity = Entity::resource(env, resource)?.into_value();
    ctx.insert_root("resource", entity.clone());
    ctx.insert_root("target", entity);
    ctx.insert_root("content", Value::object(ContentRoot));
    ctx.insert_root("site", Value::object(SiteRoot));
    ctx.insert_root("request", request_value(env.request));

    for title in hooks(env, Hook::Middleware, type_id)?.iter() {
        let middleware = env
            .site
            .functions
            .middleware(title)
            .ok_or_else(|| PipelineError::Internal(format!("no middleware registered as '{title}'")))?;
        middleware(env, &mut ctx, resource, template)?;
    }

    let body = templates::render(env, type_id, template, &mut ctx)?;
    let mut response = Response::ok(&template.mime, body);

    for title in hooks(env, Hook::ResponseProcessor, type_id)?.iter() {
        let processor = env.site.functions.response_processor(title).ok_or_else(|| {
            PipelineError::Internal(format!("no response processor registered as '{title}'"))
        })?;
        processor(env, &ctx, resource, template, &mut response)?;
    }
    Ok(response)
}

/// 500 from the error template file, falling back to a built-in page.
fn internal_error(env: &Env<'_>, failure: &PipelineError) -> Response {
    let body = env
        .site
        .config
        .templates
        .error_template
        .as_ref()
        .and_then(|path| {
            let source = fs::read_to_string(path)
                .map_err(|e| warn!(path = %path.display(), error = %e, "cannot read error template"))
                .ok()?;
            let mut ctx = Context::new();
            ctx.insert_root("request", request_value(env.request));
            ctx.insert_root("error", Value::from(failure.to_string()));
            let label = path.display().to_string();
            templates::render_source(env, 0, &label, "text/html", &source, &mut ctx)
                .map_err(|e| warn!(path = %label, error = %e, "error template failed"))
                .ok()
        })
        .unwrap_or_else(|| fallback_error_page(env.request));
    Response::new(500)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_body(body)
}

fn fallback_error_page(request: &Request) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { "Server Error" }
            }
            body {
                h1 { "Server Error" }
                p { "Something went wrong while answering " code { (request.path) } "." }
            }
        }
    }
    .into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Hook;
    use crate::resource::ResourceSpec;
    use crate::resource_type::{TypeSpec, save_type};
    use crate::test_helpers::TestSite;
    use std::io::Write;

    fn get(site: &TestSite, path: &str) -> Response {
        handle(site, &Request::get(path))
    }

    #[test]
    fn unknown_path_is_404() {
        let site = TestSite::new();
        assert_eq!(get(&site, "/nowhere").status, 404);
    }

    #[test]
    fn redirect_keeps_query() {
        let site = TestSite::new();
        site.template("page.html", "text/html", "hi");
        site.page("P", "/p");
        let response = get(&site, "/P?x=1");
        assert_eq!(response.status, 301);
        assert_eq!(response.header("location"), Some("/p?x=1"));
    }

    #[test]
    fn content_type_is_template_mime() {
        let site = TestSite::new();
        site.template("page.txt", "text/plain", "{{ resource.title }}");
        site.page("Eagles", "/eagles");
        let response = get(&site, "/eagles");
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.body_text(), "Eagles");
    }

    #[test]
    fn context_carries_request_and_target() {
        let site = TestSite::new();
        site.template("page.txt", "text/plain", "{{ request.method }} {{ request.query.q }} {{ target.path }}");
        site.page("S", "/s");
        assert_eq!(get(&site, "/s?q=owl").body_text(), "GET owl /s");
    }

    fn append(ctx: &mut Context, letter: &str) {
        let before = match ctx.get("trail") {
            Some(Value::Str(s)) => s.clone(),
            _ => String::new(),
        };
        ctx.insert_root("trail", Value::from(format!("{before}{letter}")));
    }

    #[test]
    fn middleware_runs_child_first_once() {
        let site = TestSite::new();
        site.functions.register_middleware("trace.a", |_, ctx, _, _| {
            append(ctx, "a");
            Ok(())
        });
        site.functions.register_middleware("trace.b", |_, ctx, _, _| {
            append(ctx, "b");
            Ok(())
        });
        let child = site
            .store
            .write(|tx| save_type(tx, &TypeSpec::resource("child").with_parent(site.default_type)))
            .unwrap();
        site.attach(Hook::Middleware, child.id, "trace.a", 0).unwrap();
        site.attach(Hook::Middleware, site.default_type, "trace.b", 0).unwrap();
        site.attach(Hook::Middleware, site.default_type, "trace.a", 1).unwrap();
        site.template("page.txt", "text/plain", "{{ trail }}");
        site.page_of_type("C", "/c", child.id);
        assert_eq!(get(&site, "/c").body_text(), "ab");
    }

    #[test]
    fn middleware_not_found_is_404() {
        let site = TestSite::new();
        site.functions.register_middleware("gone", |_, _, r, _| {
            Err(PipelineError::NotFound(r.path.clone()))
        });
        site.attach(Hook::Middleware, site.default_type, "gone", 0).unwrap();
        site.template("page.txt", "text/plain", "x");
        site.page("G", "/g");
        assert_eq!(get(&site, "/g").status, 404);
    }

    #[test]
    fn broken_template_is_500_with_builtin_page() {
        let site = TestSite::new();
        site.template("page.html", "text/html", "{% if %}");
        site.page("B", "/broken");
        let response = get(&site, "/broken");
        assert_eq!(response.status, 500);
        assert!(response.body_text().contains("Server Error"));
        assert!(response.body_text().contains("/broken"));
    }

    #[test]
    fn error_template_file_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<p>oops at {{{{ request.path }}}}</p>").unwrap();
        let path = file.path().to_path_buf();
        let site = TestSite::with_config(|config| config.templates.error_template = Some(path));
        site.template("page.html", "text/html", "{{ broken(1) }}");
        site.page("B", "/b");
        let response = get(&site, "/b");
        assert_eq!(response.status, 500);
        assert_eq!(response.body_text(), "<p>oops at /b</p>");
    }

    #[test]
    fn missing_template_is_500() {
        let site = TestSite::new();
        site.page("N", "/n");
        assert_eq!(get(&site, "/n").status, 500);
    }

    #[test]
    fn processors_see_rendered_body() {
        let site = TestSite::new();
        site.functions.register_response_processor("shout", |_, _, _, _, response| {
            response.body = response.body.to_ascii_uppercase();
            response.set_header("X-Shout", "yes");
            Ok(())
        });
        site.attach(Hook::ResponseProcessor, site.default_type, "shout", 0).unwrap();
        site.template("page.txt", "text/plain", "quiet");
        site.page("Q", "/q");
        let response = get(&site, "/q");
        assert_eq!(response.body_text(), "QUIET");
        assert_eq!(response.header("x-shout"), Some("yes"));
    }

    #[test]
    fn etag_answers_304_on_match() {
        let site = TestSite::new();
        site.attach(Hook::ResponseProcessor, site.default_type, crate::functions::ETAG, 0)
            .unwrap();
        site.template("page.txt", "text/plain", "same");
        site.page("E", "/e");
        let first = get(&site, "/e");
        let tag = first.header("etag").unwrap().to_string();
        let second = handle(&site, &Request::get("/e").with_header("If-None-Match", &tag));
        assert_eq!(second.status, 304);
        assert!(second.body.is_empty());
    }

    #[test]
    fn redirect_handler_checks_required_fields() {
        let site = TestSite::new();
        let spec = ResourceSpec::page("Form", "/form", site.default_type)
            .with_method("POST")
            .with_handler(crate::functions::REDIRECT)
            .with_settings(serde_json::json!({ "redirect": "/thanks", "required": ["email"] }));
        site.create_resource(&spec).unwrap();
        let ok = handle(&site, &Request::new("POST", "/form").with_body("email=a%40b.c"));
        assert_eq!((ok.status, ok.header("location")), (302, Some("/thanks")));
        let bad = handle(&site, &Request::new("POST", "/form").with_body("email=+"));
        assert_eq!(bad.status, 400);
    }
}
