//! `Accept` header parsing and candidate selection.
//!
//! Selection is a pure function of the ordered candidate list, the parsed
//! media ranges and the request host; the registry supplies candidates
//! already ordered by mapping order.

use super::{ChooseError, Template};
use std::rc::Rc;

/// One `main/sub;q=x` entry of an `Accept` header.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    pub main: String,
    pub sub: String,
    pub q: f32,
}

impl MediaRange {
    pub fn any() -> Self {
        Self {
            main: "*".into(),
            sub: "*".into(),
            q: 1.0,
        }
    }

    /// Whether a template declared as `mime` satisfies this range.
    ///
    /// Wildcards are honoured on the range side only.
    pub fn matches(&self, mime: &str) -> bool {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        let Some((main, sub)) = essence.split_once('/') else {
            return false;
        };
        (self.main == "*" || self.main == main) && (self.sub == "*" || self.sub == sub)
    }
}

/// Parse an `Accept` value into ranges, highest `q` first.
///
/// Ties keep header order. Ranges with `q=0` and malformed entries are
/// dropped; an absent or blank header is `*/*`.
pub fn parse_accept(header: Option<&str>) -> Vec<MediaRange> {
    let Some(header) = header.filter(|h| !h.trim().is_empty()) else {
        return vec![MediaRange::any()];
    };
    let mut ranges: Vec<MediaRange> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let essence = pieces.next()?.trim().to_ascii_lowercase();
            let (main, sub) = match essence.as_str() {
                "*" => ("*".to_string(), "*".to_string()),
                other => {
                    let (m, s) = other.split_once('/')?;
                    (m.trim().to_string(), s.trim().to_string())
                }
            };
            if main.is_empty() || sub.is_empty() || (main == "*" && sub != "*") {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|v| v.trim().parse::<f32>().ok())
                .unwrap_or(1.0)
                .clamp(0.0, 1.0);
            Some(MediaRange { main, sub, q })
        })
        .filter(|r| r.q > 0.0)
        .collect();
    ranges.sort_by(|a, b| b.q.total_cmp(&a.q));
    ranges
}

/// A template mapped to a type, with the mapping's order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub template: Rc<Template>,
    pub order: i64,
}

/// Restrict `candidates` to those visible from `host` and order them:
/// host-specific first, then by mapping order.
///
/// With `host` absent only generic templates remain.
pub fn visible(candidates: Vec<Candidate>, host: Option<&str>) -> Vec<Candidate> {
    let mut kept: Vec<(bool, Candidate)> = candidates
        .into_iter()
        .filter_map(|c| {
            if c.template.hosts.is_empty() {
                Some((false, c))
            } else if host.is_some_and(|h| c.template.hosts.iter().any(|t| t.eq_ignore_ascii_case(h))) {
                Some((true, c))
            } else {
                None
            }
        })
        .collect();
    kept.sort_by_key(|(specific, c)| (!*specific, c.order, c.template.id));
    kept.into_iter().map(|(_, c)| c).collect()
}

/// Distinct MIME types offered by `candidates`, in candidate order.
pub fn offered(candidates: &[Candidate]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in candidates {
        if !out.contains(&c.template.mime) {
            out.push(c.template.mime.clone());
        }
    }
    out
}

/// Walk `ranges` in priority order and take the first candidate satisfying
/// the range. `candidates` must already be [`visible`]-ordered.
pub fn pick(candidates: &[Candidate], ranges: &[MediaRange]) -> Result<Rc<Template>, ChooseError> {
    if candidates.is_empty() {
        return Err(ChooseError::NoTemplate);
    }
    ranges
        .iter()
        .find_map(|range| candidates.iter().find(|c| range.matches(&c.template.mime)))
        .map(|c| Rc::clone(&c.template))
        .ok_or_else(|| ChooseError::NotAcceptable {
            offered: offered(candidates),
        })
}
