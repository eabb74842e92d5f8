//! # Swim
//!
//! A content management core. Every request path belongs to a resource;
//! the resource's **type** decides how it is rendered: which template,
//! which middleware prepares the template context, which processors touch
//! the response. Content hangs off resources in typed **slots** and is
//! reached from templates by atom name (`resource.copy.body`,
//! `resource.image.hero.url`).
//!
//! # Request Flow
//!
//! ```text
//! Request ─→ router (path, method) ─→ handler ─→ choose template
//!                                                  │  type chain × Accept × host
//!                                                  ▼
//!            Response ←─ processors ←─ render ←─ middleware
//! ```
//!
//! Everything past the HTTP layer is synchronous and runs on a blocking
//! worker; one [`cache::RequestCache`] memoizes type chains, snapshots and
//! template choices for the life of a request.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | SQLite schema and transactional access |
//! | [`config`] | `swim.toml` loading, stock defaults, merging and validation |
//! | [`site`] | The long-lived [`site::Site`] context and the per-request [`site::Env`] |
//! | [`seed`] | Dependency-ordered, idempotent initialization |
//! | [`content_type`] | Content type catalog and class ids |
//! | [`resource_type`] | Types, inheritance chains, schemas and snapshots |
//! | [`resource`] | Resources: creation, moves, deletion |
//! | [`reservation`] | Single and tree path reservations |
//! | [`router`] | `(path, method)` → handler resolution with canonical redirects |
//! | [`slots`] | Typed payloads attached to owners under keys |
//! | [`entities`] | Arrangements, site content, copy and file records |
//! | [`menu`] | Menus and links |
//! | [`media`] | Images, image types and variant realization |
//! | [`imaging`] | Pure-Rust image operations: resize, crop, encode |
//! | [`atoms`] | Template-facing views of entities and slots |
//! | [`templates`] | Template registry, negotiation, syntax and rendering |
//! | [`functions`] | Named handlers, middleware, processors and validators |
//! | [`pipeline`] | One request from routing to response |
//! | [`server`] | axum front end and media file serving |
//! | [`cache`] | Request-scoped memoization |
//! | [`naming`] | Path canonicalization and media file layout |
//! | [`types`] | Framework-independent request and response values |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Types Own Rendering
//!
//! A resource never names its template. Its type maps templates per
//! payload type and MIME type, and children inherit everything their
//! ancestors map. Giving a hundred pages a new layout is one mapping on
//! their shared type.
//!
//! ## Snapshots Over Joins
//!
//! Each type stores a JSON snapshot of its schema members. Atom access in
//! templates reads the snapshot instead of joining schema tables on every
//! attribute lookup; schema edits refresh the snapshots of every type
//! using the schema.
//!
//! ## Lazy Variants
//!
//! Image variants declared `jit_generation` are rendered the first time a
//! template asks for their URL and reused afterwards. Eager variants are
//! rendered when the image or slot is saved. A failed render yields the
//! configured placeholder URL, never a broken page.
//!
//! ## One SQLite File
//!
//! All state lives in one SQLite database behind a mutex. Request workers
//! interleave at statement granularity; multi-statement changes run in a
//! transaction so a failed path reservation leaves nothing behind.

pub mod atoms;
pub mod cache;
pub mod config;
pub mod content_type;
pub mod entities;
pub mod functions;
pub mod imaging;
pub mod media;
pub mod menu;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod reservation;
pub mod resource;
pub mod resource_type;
pub mod router;
pub mod seed;
pub mod server;
pub mod site;
pub mod slots;
pub mod store;
pub mod templates;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
