//! Template source → AST.
//!
//! ```text
//! {{ expr|filter:arg }}           print (auto-escaped for HTML MIME types)
//! {% if a == 1 %}…{% elif b %}…{% else %}…{% endif %}
//! {% for x in xs %}…{% empty %}…{% endfor %}
//! {% with x = expr %}…{% endwith %}
//! {% block name %}…{% endblock %}  overridable region
//! {% extends "path" %}            inherit layout
//! {% include "path" %}            inline another template
//! {% render expr %}               sub-render via template choice
//! {# comment #}
//! ```

use super::TemplateError;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Filter {
        value: Box<Expr>,
        name: String,
        arg: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Print(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Node>,
        empty: Vec<Node>,
    },
    With {
        name: String,
        value: Expr,
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Rc<Vec<Node>>,
    },
    Include(String),
    Render(Expr),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub nodes: Vec<Node>,
    /// Every block defined anywhere in the template, by name.
    pub blocks: HashMap<String, Rc<Vec<Node>>>,
    pub extends: Option<String>,
}

/// Parse template `source`; `path` only labels errors.
pub fn compile(path: &str, source: &str) -> Result<Compiled, TemplateError> {
    let tokens = tokenize(path, source)?;
    let mut parser = Parser {
        path,
        tokens,
        pos: 0,
        blocks: HashMap::new(),
        extends: None,
    };
    let (nodes, end) = parser.parse_nodes(&[])?;
    if let Some(tag) = end {
        return Err(parser.error(format!("unexpected {{% {tag} %}}")));
    }
    Ok(Compiled {
        nodes,
        blocks: parser.blocks,
        extends: parser.extends,
    })
}

// =============================================================================
// Template tokens
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Var(String),
    Tag(String),
}

fn tokenize(path: &str, source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.is_empty() {
        let next = ["{{", "{%", "{#"]
            .iter()
            .filter_map(|open| rest.find(open).map(|at| (at, *open)))
            .min_by_key(|(at, _)| *at);
        let Some((at, open)) = next else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };
        if at > 0 {
            tokens.push(Token::Text(rest[..at].to_string()));
        }
        let close = match open {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let body_start = at + 2;
        let Some(len) = rest[body_start..].find(close) else {
            return Err(TemplateError::Syntax {
                path: path.to_string(),
                message: format!("unclosed {open}"),
            });
        };
        let inner = rest[body_start..body_start + len].trim().to_string();
        match open {
            "{{" => tokens.push(Token::Var(inner)),
            "{%" => tokens.push(Token::Tag(inner)),
            _ => {}
        }
        rest = &rest[body_start + len + 2..];
    }
    Ok(tokens)
}

// =============================================================================
// Node parser
// =============================================================================

struct Parser<'p> {
    path: &'p str,
    tokens: Vec<Token>,
    pos: usize,
    blocks: HashMap<String, Rc<Vec<Node>>>,
    extends: Option<String>,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            path: self.path.to_string(),
            message: message.into(),
        }
    }

    fn expr(&self, source: &str) -> Result<Expr, TemplateError> {
        parse_expr(source).map_err(|e| self.error(e))
    }

    /// Parse nodes until one of the `until` tags (returned in full) or EOF.
    fn parse_nodes(&mut self, until: &[&str]) -> Result<(Vec<Node>, Option<String>), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.tokens.len() {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Var(source) => nodes.push(Node::Print(self.expr(&source)?)),
                Token::Tag(tag) => {
                    let (name, args) = split_tag(&tag);
                    if until.contains(&name) {
                        return Ok((nodes, Some(tag)));
                    }
                    if let Some(node) = self.parse_tag(name, args)? {
                        nodes.push(node);
                    }
                }
            }
        }
        if until.is_empty() {
            Ok((nodes, None))
        } else {
            Err(self.error(format!("missing {{% {} %}}", until[until.len() - 1])))
        }
    }

    fn parse_tag(&mut self, name: &str, args: &str) -> Result<Option<Node>, TemplateError> {
        let node = match name {
            "if" => {
                let mut branches = Vec::new();
                let mut otherwise = Vec::new();
                let mut cond = self.expr(args)?;
                loop {
                    let (body, end) = self.parse_nodes(&["elif", "else", "endif"])?;
                    branches.push((cond, body));
                    let end = end.unwrap_or_default();
                    let (end_name, end_args) = split_tag(&end);
                    match end_name {
                        "elif" => cond = self.expr(end_args)?,
                        "else" => {
                            otherwise = self.parse_nodes(&["endif"])?.0;
                            break;
                        }
                        _ => break,
                    }
                }
                Node::If { branches, otherwise }
            }
            "for" => {
                let (var, iter) = args
                    .split_once(" in ")
                    .ok_or_else(|| self.error("expected {% for name in expr %}"))?;
                let var = var.trim();
                if !is_identifier(var) {
                    return Err(self.error(format!("bad loop variable {var:?}")));
                }
                let iter = self.expr(iter)?;
                let (body, end) = self.parse_nodes(&["empty", "endfor"])?;
                let empty = match end.as_deref() {
                    Some("empty") => self.parse_nodes(&["endfor"])?.0,
                    _ => Vec::new(),
                };
                Node::For {
                    var: var.to_string(),
                    iter,
                    body,
                    empty,
                }
            }
            "with" => {
                let (var, value) = args
                    .split_once('=')
                    .ok_or_else(|| self.error("expected {% with name = expr %}"))?;
                let var = var.trim();
                if !is_identifier(var) {
                    return Err(self.error(format!("bad variable {var:?}")));
                }
                let value = self.expr(value)?;
                let body = self.parse_nodes(&["endwith"])?.0;
                Node::With {
                    name: var.to_string(),
                    value,
                    body,
                }
            }
            "block" => {
                let block = args.trim();
                if !is_identifier(block) {
                    return Err(self.error(format!("bad block name {block:?}")));
                }
                if self.blocks.contains_key(block) {
                    return Err(self.error(format!("block {block:?} defined twice")));
                }
                let body = Rc::new(self.parse_nodes(&["endblock"])?.0);
                self.blocks.insert(block.to_string(), Rc::clone(&body));
                Node::Block {
                    name: block.to_string(),
                    body,
                }
            }
            "extends" => {
                if self.extends.is_some() {
                    return Err(self.error("only one {% extends %} allowed"));
                }
                self.extends = Some(self.string_arg(args)?);
                return Ok(None);
            }
            "include" => Node::Include(self.string_arg(args)?),
            "render" => Node::Render(self.expr(args)?),
            other => return Err(self.error(format!("unknown tag {other:?}"))),
        };
        Ok(Some(node))
    }

    fn string_arg(&self, args: &str) -> Result<String, TemplateError> {
        match self.expr(args)? {
            Expr::Literal(Literal::Str(s)) => Ok(s),
            _ => Err(self.error("expected a quoted template path")),
        }
    }
}

fn split_tag(tag: &str) -> (&str, &str) {
    match tag.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (tag, ""),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// =============================================================================
// Expression parser
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    Colon,
    Op(BinOp),
}

fn lex(source: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                out.push(Tok::Dot);
                i += 1;
            }
            '[' | ']' | '(' | ')' | ',' | '|' | ':' => {
                out.push(match c {
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    ',' => Tok::Comma,
                    '|' => Tok::Pipe,
                    _ => Tok::Colon,
                });
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (BinOp::Eq, 2),
                    ('!', Some('=')) => (BinOp::Ne, 2),
                    ('<', Some('=')) => (BinOp::Le, 2),
                    ('>', Some('=')) => (BinOp::Ge, 2),
                    ('<', _) => (BinOp::Lt, 1),
                    ('>', _) => (BinOp::Gt, 1),
                    _ => return Err(format!("unexpected {c:?}")),
                };
                out.push(Tok::Op(op));
                i += width;
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".into()),
                        Some(&ch) if ch == quote => break,
                        Some('\\') if chars.get(i + 1).is_some() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                i += 1;
                out.push(Tok::Str(text));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                out.push(Tok::Int(
                    digits.parse().map_err(|_| format!("bad number {digits}"))?,
                ));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push(match word.as_str() {
                    "and" => Tok::Op(BinOp::And),
                    "or" => Tok::Op(BinOp::Or),
                    _ => Tok::Ident(word),
                });
            }
            other => return Err(format!("unexpected {other:?}")),
        }
    }
    Ok(out)
}

/// Parse a standalone expression.
pub fn parse_expr(source: &str) -> Result<Expr, String> {
    let toks = lex(source)?;
    if toks.is_empty() {
        return Err("empty expression".into());
    }
    let mut p = ExprParser { toks, pos: 0 };
    let expr = p.or()?;
    if p.pos != p.toks.len() {
        return Err(format!("unexpected {:?} in {source:?}", p.toks[p.pos]));
    }
    Ok(expr)
}

struct ExprParser {
    toks: Vec<Tok>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: Tok) -> Result<(), String> {
        match self.bump() {
            Some(tok) if tok == want => Ok(()),
            other => Err(format!("expected {want:?}, found {other:?}")),
        }
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.peek() == Some(&Tok::Op(BinOp::Or)) {
            self.pos += 1;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.not()?;
        while self.peek() == Some(&Tok::Op(BinOp::And)) {
            self.pos += 1;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == "not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.filtered()?;
        match self.peek() {
            Some(Tok::Op(op)) if !matches!(op, BinOp::And | BinOp::Or) => {
                let op = *op;
                self.pos += 1;
                Ok(Expr::Binary(op, Box::new(left), Box::new(self.filtered()?)))
            }
            _ => Ok(left),
        }
    }

    fn filtered(&mut self) -> Result<Expr, String> {
        let mut value = self.postfix()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            let name = match self.bump() {
                Some(Tok::Ident(name)) => name,
                other => return Err(format!("expected filter name, found {other:?}")),
            };
            let arg = if self.peek() == Some(&Tok::Colon) {
                self.pos += 1;
                Some(Box::new(self.postfix()?))
            } else {
                None
            };
            value = Expr::Filter {
                value: Box::new(value),
                name,
                arg,
            };
        }
        Ok(value)
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.pos += 1;
                    expr = match self.bump() {
                        Some(Tok::Ident(name)) => Expr::Attr(Box::new(expr), name),
                        Some(Tok::Int(n)) => {
                            Expr::Index(Box::new(expr), Box::new(Expr::Literal(Literal::Int(n))))
                        }
                        other => return Err(format!("expected attribute, found {other:?}")),
                    };
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    let index = self.or()?;
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Tok::Int(n)) => Ok(Expr::Literal(Literal::Int(n))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Tok::LParen) => {
                let inner = self.or()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" | "True" => Ok(Expr::Literal(Literal::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Literal::Bool(false))),
                "none" | "None" => Ok(Expr::Literal(Literal::None)),
                _ if self.peek() == Some(&Tok::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            args.push(self.or()?);
                            if self.peek() == Some(&Tok::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RParen)?;
                    Ok(Expr::Call(word, args))
                }
                _ => Ok(Expr::Var(word)),
            },
            other => Err(format!("unexpected {other:?}")),
        }
    }
}
