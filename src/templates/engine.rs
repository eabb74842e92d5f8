//! Template rendering.
//!
//! A render walks the compiled node tree against a [`Context`]. Blocks,
//! loops and `with` push a frame on entry and pop it on exit, so anything
//! the pipeline put in the root frame stays visible at every depth.
//! `{% render expr %}` chooses a sub-template for the value (trying each of
//! its payload types in turn, negotiating with the enclosing MIME) and
//! renders it with `target` bound to the value in a fresh frame.

use super::registry::{choose_template, find_by_path};
use super::syntax::{BinOp, Compiled, Expr, Literal, Node, compile};
use super::value::{Context, Value};
use super::{Template, TemplateError, is_html};
use crate::atoms;
use crate::resource_type::ResourceTypeId;
use crate::site::Env;
use chrono::format::StrftimeItems;
use pulldown_cmark::{Parser, html as md_html};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

/// Deepest allowed nesting of include / extends / render.
pub const MAX_DEPTH: usize = 32;

/// Render `template` for a resource of `type_id`.
pub fn render(
    env: &Env<'_>,
    type_id: ResourceTypeId,
    template: &Template,
    ctx: &mut Context,
) -> Result<String, TemplateError> {
    let mut out = String::new();
    Renderer {
        env,
        type_id,
        depth: 0,
    }
    .template(template, ctx, &mut out)?;
    Ok(out)
}

/// Render template text that is not stored in the registry.
///
/// `extends` and `include` still resolve through the registry.
pub fn render_source(
    env: &Env<'_>,
    type_id: ResourceTypeId,
    label: &str,
    mime: &str,
    source: &str,
    ctx: &mut Context,
) -> Result<String, TemplateError> {
    let compiled = Rc::new(compile(label, source)?);
    let mut out = String::new();
    Renderer {
        env,
        type_id,
        depth: 0,
    }
    .compiled(compiled, mime, ctx, &mut out)?;
    Ok(out)
}

struct Renderer<'r, 'a> {
    env: &'r Env<'a>,
    type_id: ResourceTypeId,
    depth: usize,
}

/// Per-template render settings.
struct Scope<'s> {
    mime: &'s str,
    escape: bool,
    overrides: &'s HashMap<String, Rc<Vec<Node>>>,
}

impl Renderer<'_, '_> {
    fn deeper(&self) -> Result<Self, TemplateError> {
        if self.depth >= MAX_DEPTH {
            return Err(TemplateError::Depth(MAX_DEPTH));
        }
        Ok(Renderer {
            env: self.env,
            type_id: self.type_id,
            depth: self.depth + 1,
        })
    }

    fn compile_cached(&self, template: &Template) -> Result<Rc<Compiled>, TemplateError> {
        self.env.cache.compiled(template.id, || {
            compile(&template.path, &template.body).map(Rc::new)
        })
    }

    fn lookup(&self, path: &str, mime: &str) -> Result<Rc<Template>, TemplateError> {
        let store = &self.env.site.store;
        self.env
            .cache
            .template_by_path(path, mime, || {
                store
                    .read(|conn| find_by_path(conn, path, mime))
                    .map(|found| found.map(Rc::new))
            })?
            .ok_or_else(|| TemplateError::Missing(format!("{path} ({mime})")))
    }

    fn template(&self, template: &Template, ctx: &mut Context, out: &mut String) -> Result<(), TemplateError> {
        let compiled = self.compile_cached(template)?;
        self.compiled(compiled, &template.mime, ctx, out)
    }

    /// Resolve the `extends` chain, then render the root layout with the
    /// most-derived definition of every block.
    fn compiled(
        &self,
        mut current: Rc<Compiled>,
        mime: &str,
        ctx: &mut Context,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let mut overrides: HashMap<String, Rc<Vec<Node>>> = HashMap::new();
        let mut hops = 0;
        while let Some(parent) = current.extends.clone() {
            for (name, body) in &current.blocks {
                overrides
                    .entry(name.clone())
                    .or_insert_with(|| Rc::clone(body));
            }
            hops += 1;
            if hops > MAX_DEPTH {
                return Err(TemplateError::Depth(MAX_DEPTH));
            }
            let parent = self.lookup(&parent, mime)?;
            current = self.compile_cached(&parent)?;
        }
        let scope = Scope {
            mime,
            escape: is_html(mime),
            overrides: &overrides,
        };
        self.nodes(&current.nodes, ctx, &scope, out)
    }

    fn nodes(&self, nodes: &[Node], ctx: &mut Context, scope: &Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            self.node(node, ctx, scope, out)?;
        }
        Ok(())
    }

    /// Run `body` inside a pushed frame, popping it whatever the outcome.
    fn framed(
        &self,
        ctx: &mut Context,
        bindings: Vec<(&str, Value)>,
        body: impl FnOnce(&mut Context) -> Result<(), TemplateError>,
    ) -> Result<(), TemplateError> {
        ctx.push();
        for (name, value) in bindings {
            ctx.set(name, value);
        }
        let result = body(ctx);
        ctx.pop();
        result
    }

    fn node(&self, node: &Node, ctx: &mut Context, scope: &Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Print(expr) => {
                let value = self.eval(expr, ctx)?;
                self.print(&value, scope, out)?;
            }
            Node::If { branches, otherwise } => {
                for (cond, body) in branches {
                    if self.eval(cond, ctx)?.truthy() {
                        return self.nodes(body, ctx, scope, out);
                    }
                }
                self.nodes(otherwise, ctx, scope, out)?;
            }
            Node::For {
                var,
                iter,
                body,
                empty,
            } => {
                let items = self.eval(iter, ctx)?.iterate(self.env)?;
                if items.is_empty() {
                    return self.nodes(empty, ctx, scope, out);
                }
                let length = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    let forloop = Value::map([
                        ("index", Value::Int(i as i64 + 1)),
                        ("index0", Value::Int(i as i64)),
                        ("first", Value::Bool(i == 0)),
                        ("last", Value::Bool(i + 1 == length)),
                        ("length", Value::Int(length as i64)),
                    ]);
                    self.framed(ctx, vec![(var.as_str(), item), ("forloop", forloop)], |ctx| {
                        self.nodes(body, ctx, scope, out)
                    })?;
                }
            }
            Node::With { name, value, body } => {
                let value = self.eval(value, ctx)?;
                self.framed(ctx, vec![(name.as_str(), value)], |ctx| {
                    self.nodes(body, ctx, scope, out)
                })?;
            }
            Node::Block { name, body } => {
                let body = scope.overrides.get(name).unwrap_or(body);
                self.framed(ctx, Vec::new(), |ctx| self.nodes(body, ctx, scope, out))?;
            }
            Node::Include(path) => {
                let included = self.lookup(path, scope.mime)?;
                self.deeper()?.template(&included, ctx, out)?;
            }
            Node::Render(expr) => {
                let value = self.eval(expr, ctx)?;
                self.render_value(value, ctx, scope, out)?;
            }
        }
        Ok(())
    }

    fn print(&self, value: &Value, scope: &Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
        let text = value.display(self.env)?;
        if scope.escape && !matches!(value, Value::Safe(_)) {
            out.push_str(&escape(&text));
        } else {
            out.push_str(&text);
        }
        Ok(())
    }

    /// `{% render %}`: lists render element-wise; objects go through template
    /// choice; anything without a template is printed.
    fn render_value(&self, value: Value, ctx: &mut Context, scope: &Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
        let object = match &value {
            Value::None => return Ok(()),
            Value::List(items) => {
                for item in items.clone() {
                    self.render_value(item, ctx, scope, out)?;
                }
                return Ok(());
            }
            Value::Object(object) => Rc::clone(object),
            _ => return self.print(&value, scope, out),
        };
        if let Some(items) = object.items(self.env)? {
            for item in items {
                self.render_value(item, ctx, scope, out)?;
            }
            return Ok(());
        }
        let host = self.env.request.host();
        for payload_type in object.payload_types() {
            let chosen = choose_template(
                self.env,
                self.type_id,
                &payload_type,
                Some(scope.mime),
                host.as_deref(),
            )?;
            if let Ok(template) = chosen {
                let inner = self.deeper()?;
                return self.framed(ctx, vec![("target", value.clone())], |ctx| {
                    inner.template(&template, ctx, out)
                });
            }
        }
        self.print(&value, scope, out)
    }

    fn eval(&self, expr: &Expr, ctx: &Context) -> Result<Value, TemplateError> {
        let env = self.env;
        Ok(match expr {
            Expr::Literal(lit) => match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(n) => Value::Int(*n),
                Literal::Str(s) => Value::Str(s.clone()),
            },
            Expr::Var(name) => ctx.get(name).cloned().unwrap_or_default(),
            Expr::Attr(target, name) => self.eval(target, ctx)?.attr(env, name)?,
            Expr::Index(target, index) => {
                let index = self.eval(index, ctx)?;
                self.eval(target, ctx)?.index(env, &index)?
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, args)?
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner, ctx)?.truthy()),
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left, ctx)?;
                if left.truthy() { self.eval(right, ctx)? } else { left }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left, ctx)?;
                if left.truthy() { left } else { self.eval(right, ctx)? }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                let ord = left.compare(&right);
                Value::Bool(match op {
                    BinOp::Eq => left.loosely_equals(&right),
                    BinOp::Ne => !left.loosely_equals(&right),
                    BinOp::Lt => ord == Some(Ordering::Less),
                    BinOp::Gt => ord == Some(Ordering::Greater),
                    BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                    BinOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                    BinOp::And => left.truthy() && right.truthy(),
                    BinOp::Or => left.truthy() || right.truthy(),
                })
            }
            Expr::Filter { value, name, arg } => {
                let value = self.eval(value, ctx)?;
                let arg = arg.as_ref().map(|a| self.eval(a, ctx)).transpose()?;
                self.filter(name, value, arg)?
            }
        })
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        match name {
            "get_entities_by_enum" => {
                let texts = args
                    .iter()
                    .map(|a| a.display(self.env))
                    .collect::<Result<Vec<_>, _>>()?;
                let [kind, key, value] = texts.as_slice() else {
                    return Err(TemplateError::Render(
                        "get_entities_by_enum takes (kind, key, value)".into(),
                    ));
                };
                Ok(Value::List(atoms::get_entities_by_enum(self.env, kind, key, value)?))
            }
            other => Err(TemplateError::Render(format!("unknown function {other:?}"))),
        }
    }

    fn filter(&self, name: &str, value: Value, arg: Option<Value>) -> Result<Value, TemplateError> {
        let env = self.env;
        let arg_text = |default: &str| -> Result<String, TemplateError> {
            match &arg {
                Some(a) => a.display(env),
                None => Ok(default.to_string()),
            }
        };
        Ok(match name {
            "default" => {
                if value.truthy() {
                    value
                } else {
                    arg.unwrap_or_default()
                }
            }
            "safe" => match value {
                Value::Safe(_) => value,
                other => Value::Safe(other.display(env)?),
            },
            "escape" => Value::Safe(escape(&value.display(env)?)),
            "markdown" => Value::Safe(markdown(&value.display(env)?)),
            "upper" => Value::Str(value.display(env)?.to_uppercase()),
            "lower" => Value::Str(value.display(env)?.to_lowercase()),
            "length" => {
                let n = match &value {
                    Value::None => 0,
                    Value::Str(s) | Value::Safe(s) => s.chars().count(),
                    Value::Map(map) => map.len(),
                    other => other.iterate(env)?.len(),
                };
                Value::Int(n as i64)
            }
            "join" => {
                let sep = arg_text(", ")?;
                let parts = value
                    .iterate(env)?
                    .iter()
                    .map(|v| v.display(env))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Str(parts.join(&sep))
            }
            "date" => {
                let fmt = arg_text("%Y-%m-%d")?;
                let items = StrftimeItems::new(&fmt);
                let mut text = String::new();
                let written = match &value {
                    Value::Date(d) => write!(text, "{}", d.format_with_items(items)),
                    Value::DateTime(d) => write!(text, "{}", d.format_with_items(items)),
                    Value::Time(t) => write!(text, "{}", t.format_with_items(items)),
                    Value::Instant(t) => write!(text, "{}", t.format_with_items(items)),
                    other => return Ok(other.clone()),
                };
                written.map_err(|_| {
                    TemplateError::Render(format!("date format {fmt:?} does not fit the value"))
                })?;
                Value::Str(text)
            }
            "json" => Value::Safe(
                serde_json::to_string(&value.to_json(env)?)
                    .map_err(|e| TemplateError::Render(e.to_string()))?,
            ),
            other => return Err(TemplateError::Render(format!("unknown filter {other:?}"))),
        })
    }
}

/// HTML-escape through maud's escaper.
pub fn escape(text: &str) -> String {
    maud::html! { (text) }.into_string()
}

fn markdown(source: &str) -> String {
    let mut html = String::new();
    md_html::push_html(&mut html, Parser::new(source));
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::TestSite;
    use crate::types::Request;
    use chrono::NaiveDate;

    fn run(source: &str, mime: &str, setup: impl FnOnce(&mut Context)) -> String {
        let site = TestSite::new();
        let request = Request::get("/");
        site.with_env(&request, |env| {
            let mut ctx = Context::new();
            setup(&mut ctx);
            render_source(env, site.default_type, "test", mime, source, &mut ctx).unwrap()
        })
    }

    fn run_err(source: &str) -> TemplateError {
        let site = TestSite::new();
        let request = Request::get("/");
        site.with_env(&request, |env| {
            let mut ctx = Context::new();
            render_source(env, site.default_type, "test", "text/plain", source, &mut ctx).unwrap_err()
        })
    }

    fn letters() -> Value {
        Value::List(vec!["A".into(), "B".into(), "C".into()])
    }

    #[test]
    fn list_attributes_reach_the_first_element() {
        let out = run("{{ xs.name }}|{{ none.name }}|{{ xs.length }}", "text/plain", |c| {
            c.insert_root(
                "xs",
                Value::List(vec![
                    Value::map([("name", Value::from("first"))]),
                    Value::map([("name", Value::from("second"))]),
                ]),
            );
            c.insert_root("none", Value::List(vec![]));
        });
        assert_eq!(out, "first||2");
    }

    // =========================================================================
    // Printing and escaping
    // =========================================================================

    #[test]
    fn html_output_is_escaped() {
        let out = run("{{ x }}", "text/html", |c| c.insert_root("x", "<b>&".into()));
        assert_eq!(out, "&lt;b&gt;&amp;");
    }

    #[test]
    fn safe_and_non_html_are_raw() {
        assert_eq!(run("{{ x|safe }}", "text/html", |c| c.insert_root("x", "<b>".into())), "<b>");
        assert_eq!(run("{{ x }}", "application/json", |c| c.insert_root("x", "<b>".into())), "<b>");
    }

    #[test]
    fn missing_values_print_nothing() {
        assert_eq!(run("[{{ nope.deeper.still }}]", "text/plain", |_| {}), "[]");
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn for_loop_with_forloop_vars() {
        let out = run(
            "{% for c in xs %}{{ forloop.index }}{{ c }}{% if not forloop.last %},{% endif %}{% endfor %}",
            "text/plain",
            |c| c.insert_root("xs", letters()),
        );
        assert_eq!(out, "1A,2B,3C");
    }

    #[test]
    fn for_over_scalar_runs_once_and_none_runs_empty() {
        assert_eq!(run("{% for c in x %}<{{ c }}>{% endfor %}", "text/plain", |c| c.insert_root("x", "solo".into())), "<solo>");
        assert_eq!(run("{% for c in x %}y{% empty %}none{% endfor %}", "text/plain", |_| {}), "none");
    }

    #[test]
    fn if_elif_else() {
        let src = "{% if n > 2 %}big{% elif n == 2 %}two{% else %}small{% endif %}";
        assert_eq!(run(src, "text/plain", |c| c.insert_root("n", Value::Int(3))), "big");
        assert_eq!(run(src, "text/plain", |c| c.insert_root("n", Value::Int(2))), "two");
        assert_eq!(run(src, "text/plain", |c| c.insert_root("n", Value::Int(1))), "small");
    }

    #[test]
    fn with_binds_inside_only() {
        let out = run("{% with y = x|upper %}{{ y }}{% endwith %}[{{ y }}]", "text/plain", |c| {
            c.insert_root("x", "hi".into())
        });
        assert_eq!(out, "HI[]");
    }

    #[test]
    fn render_list_renders_each_element() {
        assert_eq!(run("{% render xs %}", "text/plain", |c| c.insert_root("xs", letters())), "ABC");
    }

    // =========================================================================
    // Filters
    // =========================================================================

    #[test]
    fn text_filters() {
        let out = run(
            "{{ xs|join:'-' }} {{ xs|length }} {{ missing|default:'d' }} {{ s|lower }}",
            "text/plain",
            |c| {
                c.insert_root("xs", letters());
                c.insert_root("s", "MiXed".into());
            },
        );
        assert_eq!(out, "A-B-C 3 d mixed");
    }

    #[test]
    fn markdown_filter_is_safe_html() {
        let out = run("{{ s|markdown }}", "text/html", |c| c.insert_root("s", "*hi*".into()));
        assert_eq!(out.trim(), "<p><em>hi</em></p>");
    }

    #[test]
    fn date_filter_formats_and_rejects_mismatch() {
        let d = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        let out = run("{{ d|date:'%d/%m/%Y' }}", "text/plain", |c| c.insert_root("d", d.clone()));
        assert_eq!(out, "09/03/2024");

        let site = TestSite::new();
        let request = Request::get("/");
        let err = site.with_env(&request, |env| {
            let mut ctx = Context::new();
            ctx.insert_root("d", d);
            render_source(env, site.default_type, "t", "text/plain", "{{ d|date:'%H' }}", &mut ctx)
                .unwrap_err()
        });
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn json_filter() {
        let out = run("{{ xs|json }}", "text/html", |c| c.insert_root("xs", letters()));
        assert_eq!(out, r#"["A","B","C"]"#);
    }

    #[test]
    fn unknown_filter_and_function_fail() {
        assert!(matches!(run_err("{{ x|frob }}"), TemplateError::Render(_)));
        assert!(matches!(run_err("{{ frob() }}"), TemplateError::Render(_)));
    }

    // =========================================================================
    // Composition
    // =========================================================================

    #[test]
    fn extends_overrides_blocks_and_keeps_root_keys() {
        let site = TestSite::new();
        site.template(
            "layout.html",
            "text/html",
            "<title>{% block title %}Site{% endblock %}</title>{% block body %}{% endblock %}",
        );
        let request = Request::get("/");
        let out = site.with_env(&request, |env| {
            let mut ctx = Context::new();
            ctx.insert_root("who", "root".into());
            render_source(
                env,
                site.default_type,
                "page",
                "text/html",
                "{% extends 'layout.html' %}{% block body %}{% with x = 1 %}{{ who }}{% endwith %}{% endblock %}",
                &mut ctx,
            )
            .unwrap()
        });
        assert_eq!(out, "<title>Site</title>root");
    }

    #[test]
    fn include_renders_with_same_context() {
        let site = TestSite::new();
        site.template("footer", "text/plain", "by {{ who }}");
        let request = Request::get("/");
        let out = site.with_env(&request, |env| {
            let mut ctx = Context::new();
            ctx.insert_root("who", "me".into());
            render_source(env, site.default_type, "t", "text/plain", "x {% include 'footer' %}", &mut ctx)
                .unwrap()
        });
        assert_eq!(out, "x by me");
    }

    #[test]
    fn missing_include_is_an_error() {
        assert!(matches!(run_err("{% include 'nowhere' %}"), TemplateError::Missing(_)));
    }

    #[test]
    fn self_include_hits_depth_limit() {
        let site = TestSite::new();
        site.template("loop", "text/plain", "{% include 'loop' %}");
        let request = Request::get("/");
        let err = site.with_env(&request, |env| {
            let mut ctx = Context::new();
            render_source(env, site.default_type, "t", "text/plain", "{% include 'loop' %}", &mut ctx)
                .unwrap_err()
        });
        assert!(matches!(err, TemplateError::Depth(MAX_DEPTH)));
    }
}
