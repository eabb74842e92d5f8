//! Values seen by templates and the layered render context.

use super::TemplateError;
use crate::site::Env;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A lazily resolved template value (entities, slot accessors, images).
///
/// Every method may touch the store through `env`; implementations that have
/// nothing to say for a method keep the default.
pub trait Object: fmt::Debug {
    /// `value.name`. Unknown names are `Value::None`, never an error.
    fn attr(&self, env: &Env<'_>, name: &str) -> Result<Value, TemplateError>;

    /// `value[index]`.
    fn index(&self, _env: &Env<'_>, _index: usize) -> Result<Value, TemplateError> {
        Ok(Value::None)
    }

    /// Elements when iterated; `None` means "iterate as a single value".
    fn items(&self, _env: &Env<'_>) -> Result<Option<Vec<Value>>, TemplateError> {
        Ok(None)
    }

    /// Text printed by `{{ value }}`.
    fn display(&self, _env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(String::new())
    }

    /// Content type titles to try, most specific first, when this value is
    /// the subject of `{% render %}`.
    fn payload_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn to_json(&self, env: &Env<'_>) -> Result<serde_json::Value, TemplateError> {
        Ok(serde_json::Value::String(self.display(env)?))
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Text exempt from auto-escaping.
    Safe(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Instant(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(Rc<dyn Object>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

impl Value {
    pub fn object(object: impl Object + 'static) -> Self {
        Value::Object(Rc::new(object))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) | Value::Safe(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// `self.name`; missing anything yields `Value::None`.
    ///
    /// Other names on a list reach through to its first element, so a list
    /// of one payload reads like the payload itself.
    pub fn attr(&self, env: &Env<'_>, name: &str) -> Result<Value, TemplateError> {
        match self {
            Value::Map(map) => Ok(map.get(name).cloned().unwrap_or_default()),
            Value::Object(obj) => obj.attr(env, name),
            Value::List(items) => match name {
                "first" => Ok(items.first().cloned().unwrap_or_default()),
                "last" => Ok(items.last().cloned().unwrap_or_default()),
                "length" => Ok(Value::Int(items.len() as i64)),
                _ => match items.first() {
                    Some(first) => first.attr(env, name),
                    None => Ok(Value::None),
                },
            },
            _ => Ok(Value::None),
        }
    }

    /// `self[index]` with an integer or string subscript.
    pub fn index(&self, env: &Env<'_>, index: &Value) -> Result<Value, TemplateError> {
        match (self, index) {
            (Value::List(items), Value::Int(i)) => Ok(position(items.len(), *i)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default()),
            (Value::Object(obj), Value::Int(i)) if *i >= 0 => obj.index(env, *i as usize),
            (_, Value::Str(name)) | (_, Value::Safe(name)) => self.attr(env, name),
            _ => Ok(Value::None),
        }
    }

    /// Elements for `{% for %}` and `{% render %}`: lists spread, nothing is
    /// empty, anything else is a single element.
    pub fn iterate(&self, env: &Env<'_>) -> Result<Vec<Value>, TemplateError> {
        match self {
            Value::None => Ok(Vec::new()),
            Value::List(items) => Ok(items.clone()),
            Value::Object(obj) => Ok(obj.items(env)?.unwrap_or_else(|| vec![self.clone()])),
            other => Ok(vec![other.clone()]),
        }
    }

    pub fn display(&self, env: &Env<'_>) -> Result<String, TemplateError> {
        Ok(match self {
            Value::None | Value::Map(_) => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) | Value::Safe(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(d) => d.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::Instant(t) => t.to_rfc3339(),
            Value::List(items) => items
                .iter()
                .map(|v| v.display(env))
                .collect::<Result<Vec<_>, _>>()?
                .join(", "),
            Value::Object(obj) => obj.display(env)?,
        })
    }

    pub fn to_json(&self, env: &Env<'_>) -> Result<serde_json::Value, TemplateError> {
        use serde_json::Value as J;
        Ok(match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(n) => J::from(*n),
            Value::List(items) => J::Array(
                items
                    .iter()
                    .map(|v| v.to_json(env))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => J::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json(env)?)))
                    .collect::<Result<_, TemplateError>>()?,
            ),
            Value::Object(obj) => obj.to_json(env)?,
            other => J::String(other.display(env)?),
        })
    }

    /// Equality for `==`: numbers by value, text ignoring safeness.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a) | Value::Safe(a), Value::Str(b) | Value::Safe(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Instant(a), Value::Instant(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<` and friends; `None` when the values do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a) | Value::Safe(a), Value::Str(b) | Value::Safe(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Instant(a), Value::Instant(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Python-style index: negative counts from the end.
fn position(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        Some(index as usize)
    } else {
        len.checked_sub(index.unsigned_abs() as usize)
    }
}

/// Name → value bindings in nested frames.
///
/// The root frame holds what the pipeline installs (`resource`, `content`,
/// `site`, `request`, `target`, and anything middleware adds); blocks, loops
/// and sub-renders push frames above it and pop them on exit.
#[derive(Debug, Clone)]
pub struct Context {
    frames: Vec<BTreeMap<String, Value>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            frames: vec![BTreeMap::new()],
        }
    }

    /// Bind in the root frame, visible from every nested frame.
    pub fn insert_root(&mut self, name: &str, value: Value) {
        self.frames[0].insert(name.to_string(), value);
    }

    /// Bind in the innermost frame.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }

    pub fn push(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    /// Drop the innermost frame. The root frame is never dropped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::None.truthy());
        assert!(!Value::from("").truthy());
        assert!(Value::from("x").truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::List(vec![]).truthy());
        assert!(Value::List(vec![Value::None]).truthy());
    }

    #[test]
    fn loose_equality_ignores_safeness() {
        assert!(Value::Safe("a".into()).loosely_equals(&Value::from("a")));
        assert!(!Value::Int(1).loosely_equals(&Value::from("1")));
    }

    #[test]
    fn negative_positions() {
        assert_eq!(position(3, -1), Some(2));
        assert_eq!(position(3, -4), None);
        assert_eq!(position(3, 1), Some(1));
    }

    #[test]
    fn context_frames_shadow_and_restore() {
        let mut ctx = Context::new();
        ctx.insert_root("target", Value::from("page"));
        ctx.push();
        ctx.set("target", Value::from("copy"));
        assert!(matches!(ctx.get("target"), Some(Value::Str(s)) if s == "copy"));
        ctx.pop();
        assert!(matches!(ctx.get("target"), Some(Value::Str(s)) if s == "page"));
    }

    #[test]
    fn root_frame_survives_extra_pops() {
        let mut ctx = Context::new();
        ctx.insert_root("resource", Value::Int(1));
        ctx.pop();
        ctx.pop();
        assert_eq!(ctx.depth(), 1);
        assert!(ctx.get("resource").is_some());
    }

    #[test]
    fn insert_root_visible_inside_frames() {
        let mut ctx = Context::new();
        ctx.push();
        ctx.insert_root("menus", Value::Int(3));
        ctx.pop();
        assert!(matches!(ctx.get("menus"), Some(Value::Int(3))));
    }
}
