//! Stored templates: registry, content negotiation, and the render engine.
//!
//! A template is keyed by `(path, MIME, payload type)` and mapped to
//! resource types with an order. Choosing a template for a request walks the
//! type's parent chain until some type has candidates for the payload type,
//! filters them by host, and negotiates against the `Accept` header
//! ([`negotiate`]). The chosen body is compiled ([`syntax`]) and rendered
//! ([`engine`]) against a [`Context`](value::Context).

pub mod engine;
pub mod negotiate;
pub mod registry;
pub mod syntax;
pub mod value;

use crate::content_type::class;
use crate::store::StoreError;
use thiserror::Error;

pub use engine::{render, render_source};
pub use registry::{
    all_templates, choose_template, delete_template, find_by_path, load_template, map_template,
    mapped_candidates, mapped_templates, save_template, unmap_template,
};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("syntax error in {path}: {message}")]
    Syntax { path: String, message: String },
    #[error("render error: {0}")]
    Render(String),
    #[error("template not found: {0}")]
    Missing(String),
    #[error("templates nested deeper than {0} levels")]
    Depth(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why no template was chosen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChooseError {
    /// Candidates exist but none satisfies the `Accept` header.
    #[error("no template matches the Accept header; offered: {}", offered.join(", "))]
    NotAcceptable { offered: Vec<String> },
    /// Neither the type nor any ancestor maps a template for the payload type.
    #[error("no template mapped for this payload type")]
    NoTemplate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: i64,
    /// Lower-case.
    pub path: String,
    pub mime: String,
    pub payload_type_id: i64,
    pub payload_type: String,
    pub body: String,
    /// Lower-case hosts this template is restricted to; empty means generic.
    pub hosts: Vec<String>,
}

/// Input to [`save_template`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSpec {
    pub path: String,
    pub mime: String,
    pub payload_type: String,
    pub body: String,
    pub hosts: Vec<String>,
}

impl TemplateSpec {
    /// A generic template for whole resources.
    pub fn new(path: &str, mime: &str, body: &str) -> Self {
        Self {
            path: path.to_string(),
            mime: mime.to_string(),
            payload_type: class::RESOURCE.to_string(),
            body: body.to_string(),
            hosts: Vec::new(),
        }
    }

    pub fn for_payload(mut self, payload_type: &str) -> Self {
        self.payload_type = payload_type.to_string();
        self
    }

    pub fn on_host(mut self, host: &str) -> Self {
        self.hosts.push(host.to_string());
        self
    }
}

/// Whether output of `mime` is auto-escaped.
pub fn is_html(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("text/html") || essence.eq_ignore_ascii_case("application/xhtml+xml")
}
