//! CLI output formatting.
//!
//! Output is **information-centric**: every line leads with what a thing
//! is (a route, a type, a seed step) and shows where it comes from as
//! indented context lines underneath.
//!
//! # Output Format
//!
//! ## Routes
//!
//! ```text
//! Routes
//! 001 GET /eagles → swim.render
//!     Owner: page #3
//!
//! Reservations
//! /blog (tree)
//!     Owner: page #4
//! ```
//!
//! ## Types
//!
//! ```text
//! Types
//! 001 resource default (Default)
//!     Members: body (list of copy)
//!     Templates: page.html [text/html], copy.html [text/html, copy]
//! 002 resource blog (Blog)
//!     Parent: default
//! ```
//!
//! # Architecture
//!
//! Each listing has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no store access.

use crate::content_type::{OwnerRef, class};
use crate::reservation::ReservedPath;
use crate::resource_type::{Interface, ResourceType};
use crate::router::HandlerMapping;
use crate::seed::SeedReport;
use crate::templates::Template;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

// ============================================================================
// Routes
// ============================================================================

/// Routes and reservations. `owner_label` names an owner, e.g. `page #3`.
pub fn format_routes(
    mappings: &[HandlerMapping],
    reservations: &[ReservedPath],
    owner_label: impl Fn(OwnerRef) -> String,
) -> Vec<String> {
    let mut lines = vec!["Routes".to_string()];
    if mappings.is_empty() {
        lines.push(format!("{}(none)", indent(1)));
    }
    for (i, mapping) in mappings.iter().enumerate() {
        lines.push(format!(
            "{} {} {} → {}",
            format_index(i + 1),
            mapping.method,
            mapping.path,
            mapping.handler
        ));
        lines.push(format!("{}Owner: {}", indent(1), owner_label(mapping.owner)));
    }

    if !reservations.is_empty() {
        lines.push(String::new());
        lines.push("Reservations".to_string());
        for reserved in reservations {
            lines.push(format!("{} ({})", reserved.path, reserved.reservation.as_str()));
            lines.push(format!("{}Owner: {}", indent(1), owner_label(reserved.owner)));
        }
    }
    lines
}

pub fn print_routes(
    mappings: &[HandlerMapping],
    reservations: &[ReservedPath],
    owner_label: impl Fn(OwnerRef) -> String,
) {
    for line in format_routes(mappings, reservations, owner_label) {
        println!("{}", line);
    }
}

// ============================================================================
// Types
// ============================================================================

/// One resource or arrangement type with what hangs off it.
#[derive(Debug, Clone)]
pub struct TypeListing {
    pub ty: ResourceType,
    pub parent: Option<String>,
    pub members: Vec<Interface>,
    pub templates: Vec<Template>,
}

fn member_line(member: &Interface) -> String {
    format!(
        "{} ({} of {})",
        member.key,
        member.cardinality.as_str(),
        member.payload_type_title
    )
}

fn template_line(template: &Template) -> String {
    if template.payload_type == class::RESOURCE {
        format!("{} [{}]", template.path, template.mime)
    } else {
        format!(
            "{} [{}, {}]",
            template.path, template.mime, template.payload_type
        )
    }
}

pub fn format_types(types: &[TypeListing]) -> Vec<String> {
    let mut lines = vec!["Types".to_string()];
    for (i, listing) in types.iter().enumerate() {
        let ty = &listing.ty;
        lines.push(format!(
            "{} {} {} ({})",
            format_index(i + 1),
            ty.family.as_str(),
            ty.key,
            ty.title
        ));
        if let Some(parent) = &listing.parent {
            lines.push(format!("{}Parent: {}", indent(1), parent));
        }
        if !listing.members.is_empty() {
            let members: Vec<String> = listing.members.iter().map(member_line).collect();
            lines.push(format!("{}Members: {}", indent(1), members.join(", ")));
        }
        if !listing.templates.is_empty() {
            let templates: Vec<String> = listing.templates.iter().map(template_line).collect();
            lines.push(format!("{}Templates: {}", indent(1), templates.join(", ")));
        }
    }
    lines
}

pub fn print_types(types: &[TypeListing]) {
    for line in format_types(types) {
        println!("{}", line);
    }
}

// ============================================================================
// Initialization
// ============================================================================

pub fn format_seed_report(report: &SeedReport) -> Vec<String> {
    if report.steps.is_empty() {
        return vec!["Already initialized".to_string()];
    }
    let mut lines = vec!["Seeded".to_string()];
    for (i, step) in report.steps.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), step));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::Reservation;
    use crate::resource_type::{Cardinality, TypeFamily};

    fn label(owner: OwnerRef) -> String {
        format!("page #{}", owner.id)
    }

    fn mapping(path: &str, method: &str, id: i64) -> HandlerMapping {
        HandlerMapping {
            id,
            path: path.to_string(),
            method: method.to_string(),
            handler: "swim.render".to_string(),
            owner: OwnerRef::new(1, id),
        }
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn routes_list_owner_under_each_route() {
        let lines = format_routes(&[mapping("/a", "GET", 3), mapping("/a", "POST", 3)], &[], label);
        assert_eq!(
            lines,
            [
                "Routes",
                "001 GET /a → swim.render",
                "    Owner: page #3",
                "002 POST /a → swim.render",
                "    Owner: page #3",
            ]
        );
    }

    #[test]
    fn empty_routes_say_so() {
        assert_eq!(format_routes(&[], &[], label), ["Routes", "    (none)"]);
    }

    #[test]
    fn reservations_follow_routes() {
        let reserved = ReservedPath {
            path: "/blog".to_string(),
            reservation: Reservation::Tree,
            owner: OwnerRef::new(1, 4),
        };
        let lines = format_routes(&[mapping("/blog", "GET", 4)], &[reserved], label);
        assert_eq!(&lines[3..], ["", "Reservations", "/blog (tree)", "    Owner: page #4"]);
    }

    #[test]
    fn types_show_parent_members_and_templates() {
        let ty = ResourceType {
            id: 2,
            family: TypeFamily::Resource,
            key: "blog".to_string(),
            title: "Blog".to_string(),
            parent_id: Some(1),
            schema_id: Some(1),
            content_type_id: 9,
        };
        let template = |path: &str, payload: &str| Template {
            id: 1,
            path: path.to_string(),
            mime: "text/html".to_string(),
            payload_type_id: 1,
            payload_type: payload.to_string(),
            body: String::new(),
            hosts: Vec::new(),
        };
        let listing = TypeListing {
            ty,
            parent: Some("default".to_string()),
            members: vec![Interface {
                order: 0,
                key: "body".to_string(),
                title: "Body".to_string(),
                cardinality: Cardinality::List,
                payload_type_title: "copy".to_string(),
                validator: None,
            }],
            templates: vec![template("page.html", "resource"), template("copy.html", "copy")],
        };
        assert_eq!(
            format_types(&[listing]),
            [
                "Types",
                "001 resource blog (Blog)",
                "    Parent: default",
                "    Members: body (list of copy)",
                "    Templates: page.html [text/html], copy.html [text/html, copy]",
            ]
        );
    }

    #[test]
    fn seed_report_lines() {
        assert_eq!(format_seed_report(&SeedReport::default()), ["Already initialized"]);
        let report = SeedReport {
            steps: vec!["core".to_string(), "templates".to_string()],
        };
        assert_eq!(format_seed_report(&report), ["Seeded", "001 core", "002 templates"]);
    }
}
