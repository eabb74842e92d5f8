//! One-shot initialization in dependency order.
//!
//! Seed steps declare what they require by name; [`SeedPlan::order`] sorts
//! them topologically (ties by name, so the order never depends on
//! registration order). Every step is get-or-create: running the plan
//! against an already seeded database changes nothing.
//!
//! Built-in steps:
//!
//! | Step | Requires | Seeds |
//! |---|---|---|
//! | `core` | | class content types, `function` rows |
//! | `resource_types` | `core` | the `default` resource and arrangement types |
//! | `schemas` | `resource_types` | the `default` schema (a `body` list of copy) |
//! | `templates` | `resource_types` | page layout, copy/image/menu sub-templates, menus + ETag hooks |
//!
//! Collaborators add steps with [`Site::add_seed_step`] before calling
//! [`Site::initialize`]; a blog would require `resource_types` and look up
//! the default type by key when its step runs.

use crate::content_type::{CLASSES, class};
use crate::functions::{self, Hook, attach};
use crate::media::MediaError;
use crate::resource_type::{
    MemberSpec, ResourceType, TypeFamily, TypeSpec, add_member, create_schema, find_type, save_type,
    set_schema,
};
use crate::site::Site;
use crate::store::StoreError;
use crate::templates::{TemplateSpec, map_template, save_template};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("seed step '{step}' requires unknown step '{requires}'")]
    UnknownDependency { step: String, requires: String },
    #[error("seed steps depend on each other in a cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("seed step '{0}' is declared twice")]
    Duplicate(String),
    #[error("seed step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<SeedError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

pub type SeedFn = Arc<dyn Fn(&Site) -> Result<(), SeedError> + Send + Sync>;

#[derive(Clone)]
pub struct SeedStep {
    pub name: String,
    pub requires: Vec<String>,
    run: SeedFn,
}

/// Steps to run at initialization.
#[derive(Clone, Default)]
pub struct SeedPlan {
    steps: Vec<SeedStep>,
}

/// What [`Site::initialize`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Steps run, in order. Empty when the site was already initialized.
    pub steps: Vec<String>,
}

impl SeedPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in steps.
    pub fn core() -> Self {
        let mut plan = Self::new();
        let builtins: [(&str, &[&str], fn(&Site) -> Result<(), SeedError>); 4] = [
            ("core", &[], seed_core),
            ("resource_types", &["core"], seed_resource_types),
            ("schemas", &["resource_types"], seed_schemas),
            ("templates", &["resource_types"], seed_templates),
        ];
        for (name, requires, run) in builtins {
            plan.steps.push(SeedStep {
                name: name.to_string(),
                requires: requires.iter().map(|r| r.to_string()).collect(),
                run: Arc::new(run),
            });
        }
        plan
    }

    pub fn add<F>(&mut self, name: &str, requires: &[&str], run: F) -> Result<(), SeedError>
    where
        F: Fn(&Site) -> Result<(), SeedError> + Send + Sync + 'static,
    {
        if self.steps.iter().any(|s| s.name == name) {
            return Err(SeedError::Duplicate(name.to_string()));
        }
        self.steps.push(SeedStep {
            name: name.to_string(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
            run: Arc::new(run),
        });
        Ok(())
    }

    /// Steps sorted so every step follows what it requires.
    pub fn order(&self) -> Result<Vec<SeedStep>, SeedError> {
        let by_name: BTreeMap<&str, &SeedStep> =
            self.steps.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        for step in &self.steps {
            for requires in &step.requires {
                if !by_name.contains_key(requires.as_str()) {
                    return Err(SeedError::UnknownDependency {
                        step: step.name.clone(),
                        requires: requires.clone(),
                    });
                }
            }
            pending.insert(step.name.as_str(), step.requires.len());
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut ordered = Vec::with_capacity(self.steps.len());
        while let Some(name) = ready.pop_first() {
            pending.remove(name);
            ordered.push(by_name[name].clone());
            for step in &self.steps {
                if step.requires.iter().any(|r| r == name)
                    && let Some(n) = pending.get_mut(step.name.as_str())
                {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(step.name.as_str());
                    }
                }
            }
        }
        if !pending.is_empty() {
            return Err(SeedError::Cycle(pending.keys().map(|k| k.to_string()).collect()));
        }
        Ok(ordered)
    }
}

impl Site {
    /// Register a step to run at [`Site::initialize`].
    pub fn add_seed_step<F>(&self, name: &str, requires: &[&str], run: F) -> Result<(), SeedError>
    where
        F: Fn(&Site) -> Result<(), SeedError> + Send + Sync + 'static,
    {
        self.seed_plan().add(name, requires, run)
    }

    /// Run every seed step once per site. Later calls return an empty report.
    ///
    /// Callers serialize initialization; two sites seeding the same
    /// database at once is not supported.
    pub fn initialize(&self) -> Result<SeedReport, SeedError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("already initialized");
            return Ok(SeedReport::default());
        }
        let steps = match self.seed_plan().order() {
            Ok(steps) => steps,
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let mut report = SeedReport::default();
        for step in steps {
            debug!(step = %step.name, "seeding");
            if let Err(e) = (step.run)(self) {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(SeedError::Step {
                    step: step.name,
                    source: Box::new(e),
                });
            }
            report.steps.push(step.name);
        }
        info!(steps = report.steps.len(), "site initialized");
        Ok(report)
    }
}

// =============================================================================
// Built-in steps
// =============================================================================

pub const DEFAULT_TYPE: &str = "default";

fn seed_core(site: &Site) -> Result<(), SeedError> {
    for title in CLASSES {
        site.classes.id(&site.store, title)?;
    }
    let functions = site.store.write(|tx| site.functions.sync_rows(tx))?;
    debug!(classes = CLASSES.len(), functions, "core seeded");
    Ok(())
}

/// Get-or-create without touching an existing type's parent or schema.
fn ensure_type(conn: &Connection, family: TypeFamily, spec: TypeSpec) -> Result<ResourceType, StoreError> {
    match find_type(conn, family, &spec.key)? {
        Some(existing) => Ok(existing),
        None => save_type(conn, &spec),
    }
}

fn seed_resource_types(site: &Site) -> Result<(), SeedError> {
    site.store.write(|tx| {
        ensure_type(tx, TypeFamily::Resource, TypeSpec::resource(DEFAULT_TYPE).with_title("Default"))?;
        ensure_type(tx, TypeFamily::Arrangement, TypeSpec::arrangement(DEFAULT_TYPE).with_title("Default"))?;
        Ok(())
    })?;
    Ok(())
}

fn default_type(conn: &Connection) -> Result<ResourceType, StoreError> {
    find_type(conn, TypeFamily::Resource, DEFAULT_TYPE)?
        .ok_or_else(|| StoreError::not_found("resource type", DEFAULT_TYPE))
}

fn seed_schemas(site: &Site) -> Result<(), SeedError> {
    site.store.write(|tx| {
        let schema = create_schema(tx, DEFAULT_TYPE)?;
        add_member(tx, schema, &MemberSpec::list("body", class::COPY).with_title("Body"))?;
        let ty = default_type(tx)?;
        if ty.schema_id.is_none() {
            set_schema(tx, ty.id, Some(schema))?;
        }
        Ok(())
    })?;
    Ok(())
}

const BASE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{% block title %}{{ resource.title }}{% endblock %}</title>
</head>
<body>
{% block nav %}{% for link in menus.main.links %}<a href="{{ link.url }}">{{ link.title }}</a>
{% endfor %}{% endblock %}
<main>{% block content %}{% endblock %}</main>
</body>
</html>
"#;

const PAGE_HTML: &str = r#"{% extends "base.html" %}{% block content %}<h1>{{ resource.title }}</h1>
{% render resource.copy.body %}{% endblock %}"#;

const COPY_HTML: &str = "{{ target.body|markdown }}";

const IMAGE_HTML: &str = r#"<img src="{{ target.url }}" alt="{{ target.alt }}" width="{{ target.width }}" height="{{ target.height }}">"#;

const MENU_HTML: &str = r#"<ul>{% for link in target.links %}<li><a href="{{ link.url }}">{{ link.title }}</a></li>{% endfor %}</ul>"#;

fn seed_templates(site: &Site) -> Result<(), SeedError> {
    site.store.write(|tx| {
        let ty = default_type(tx)?;
        save_template(tx, &TemplateSpec::new("base.html", "text/html", BASE_HTML))?;
        let mapped = [
            TemplateSpec::new("page.html", "text/html", PAGE_HTML),
            TemplateSpec::new("copy.html", "text/html", COPY_HTML).for_payload(class::COPY),
            TemplateSpec::new("image.html", "text/html", IMAGE_HTML).for_payload(class::IMAGE),
            TemplateSpec::new("menu.html", "text/html", MENU_HTML).for_payload(class::MENU),
        ];
        for (order, spec) in mapped.iter().enumerate() {
            let template = save_template(tx, spec)?;
            map_template(tx, ty.id, template.id, order as i64)?;
        }
        attach(tx, Hook::Middleware, ty.id, functions::MENUS, 0)?;
        attach(tx, Hook::ResponseProcessor, ty.id, functions::ETAG, 0)?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::all_templates;
    use crate::test_helpers::TestSite;

    fn noop(_: &Site) -> Result<(), SeedError> {
        Ok(())
    }

    fn names(plan: &SeedPlan) -> Vec<String> {
        plan.order().unwrap().into_iter().map(|s| s.name).collect()
    }

    #[test]
    fn core_steps_in_dependency_order() {
        assert_eq!(names(&SeedPlan::core()), ["core", "resource_types", "schemas", "templates"]);
    }

    #[test]
    fn order_ignores_registration_order() {
        let mut plan = SeedPlan::new();
        plan.add("blog", &["resource_types"], noop).unwrap();
        plan.add("resource_types", &["core"], noop).unwrap();
        plan.add("core", &[], noop).unwrap();
        plan.add("analytics", &[], noop).unwrap();
        assert_eq!(names(&plan), ["analytics", "core", "resource_types", "blog"]);
    }

    #[test]
    fn unknown_dependency_and_cycles_are_errors() {
        let mut plan = SeedPlan::new();
        plan.add("a", &["missing"], noop).unwrap();
        assert!(matches!(plan.order(), Err(SeedError::UnknownDependency { .. })));

        let mut plan = SeedPlan::new();
        plan.add("a", &["b"], noop).unwrap();
        plan.add("b", &["a"], noop).unwrap();
        plan.add("c", &[], noop).unwrap();
        match plan.order() {
            Err(SeedError::Cycle(stuck)) => assert_eq!(stuck, ["a", "b"]),
            other => panic!("expected cycle, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut plan = SeedPlan::core();
        assert!(matches!(plan.add("core", &[], noop), Err(SeedError::Duplicate(_))));
    }

    #[test]
    fn initialize_runs_once_and_is_idempotent() {
        let site = TestSite::new();
        let report = site.initialize().unwrap();
        assert_eq!(report.steps.len(), 4);
        assert!(site.initialize().unwrap().steps.is_empty());

        let count = |site: &Site| site.store.read(|c| all_templates(c)).unwrap().len();
        let before = count(&site);
        site.initialized.store(false, Ordering::SeqCst);
        site.initialize().unwrap();
        assert_eq!(count(&site), before);
    }

    #[test]
    fn seeded_default_type_renders_pages() {
        let site = TestSite::new();
        site.initialize().unwrap();
        let ty = site.store.read(default_type).unwrap();
        assert!(ty.schema_id.is_some());
        let page = site.page_of_type("Hello", "/hello", ty.id);
        site.add_slot(page.owner(), 0, "body", crate::slots::Payload::copy("*hi*"))
            .unwrap();
        let response = crate::pipeline::handle(&site, &crate::types::Request::get("/hello"));
        assert_eq!(response.status, 200);
        let body = response.body_text();
        assert!(body.contains("<h1>Hello</h1>"));
        assert!(body.contains("<em>hi</em>"));
        assert!(response.header("etag").is_some());
    }

    #[test]
    fn collaborator_steps_run_after_their_requirements() {
        let site = TestSite::new();
        site.add_seed_step("blog", &["resource_types"], |site| {
            site.store.write(|tx| {
                let parent = default_type(tx)?;
                save_type(tx, &TypeSpec::resource("blog").with_parent(parent.id))?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
        let report = site.initialize().unwrap();
        let pos = |n: &str| report.steps.iter().position(|s| s == n).unwrap();
        assert!(pos("blog") > pos("resource_types"));
        let blog = site
            .store
            .read(|c| find_type(c, TypeFamily::Resource, "blog"))
            .unwrap()
            .unwrap();
        assert!(blog.parent_id.is_some());
    }
}
