//! Framework-independent request and response values.
//!
//! The pipeline never sees axum types: the HTTP layer converts into a
//! [`Request`], runs the synchronous core, and converts the returned
//! [`Response`] back. Header names are compared case-insensitively.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    /// Upper-case HTTP method.
    pub method: String,
    /// Path exactly as received, without the query string.
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: &str, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path.to_string(), None),
        };
        Self {
            method: method.to_ascii_uppercase(),
            path,
            query,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw `Accept` header, if the client sent a non-blank one.
    pub fn accept(&self) -> Option<&str> {
        self.header("accept").filter(|v| !v.trim().is_empty())
    }

    /// Lower-cased `Host` header without the port.
    pub fn host(&self) -> Option<String> {
        let host = self.header("host")?.trim();
        let host = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        };
        (!host.is_empty()).then(|| host.to_ascii_lowercase())
    }

    /// `application/x-www-form-urlencoded` body fields; later duplicates win.
    pub fn form(&self) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(&self.body)
            .into_owned()
            .collect()
    }

    /// Query string parameters.
    pub fn query_params(&self) -> BTreeMap<String, String> {
        self.query
            .as_deref()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(200)
            .with_header("Content-Type", content_type)
            .with_body(body)
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body)
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new(status).with_header("Location", location)
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found")
    }

    pub fn method_not_allowed(allowed: &[String]) -> Self {
        Self::text(405, "Method Not Allowed").with_header("Allow", &allowed.join(", "))
    }

    /// 406 naming the client's Accept value and every type the resource offers.
    pub fn not_acceptable(accept: &str, offered: &[String]) -> Self {
        Self::text(
            406,
            &format!(
                "Your client sent this Accept header: {accept}. But no matching template was \
                 found that can produce these types. This resource only emits these media \
                 types: {}.",
                offered.join(", ")
            ),
        )
    }

    /// Set header `name`, replacing any existing values.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_splits_query() {
        let req = Request::new("get", "/search?q=eagles&page=2");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/search");
        assert_eq!(req.query_params()["q"], "eagles");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = Request::get("/").with_header("Accept", "text/html");
        assert_eq!(req.header("accept"), Some("text/html"));
        assert_eq!(req.accept(), Some("text/html"));
    }

    #[test]
    fn blank_accept_is_absent() {
        let req = Request::get("/").with_header("Accept", "  ");
        assert_eq!(req.accept(), None);
    }

    #[test]
    fn host_strips_port_and_lowercases() {
        let req = Request::get("/").with_header("Host", "Example.COM:8000");
        assert_eq!(req.host().as_deref(), Some("example.com"));
        assert_eq!(Request::get("/").host(), None);
    }

    #[test]
    fn form_body_decodes() {
        let req = Request::new("POST", "/f").with_body("name=Ada+L&note=a%26b");
        let form = req.form();
        assert_eq!(form["name"], "Ada L");
        assert_eq!(form["note"], "a&b");
    }

    #[test]
    fn not_acceptable_body_lists_offered_types() {
        let resp = Response::not_acceptable(
            "app/doesnt_exist",
            &["text/html".to_string(), "application/json".to_string()],
        );
        assert_eq!(resp.status, 406);
        let body = resp.body_text();
        assert!(body.starts_with("Your client sent this Accept header: app/doesnt_exist."));
        assert!(body.ends_with("text/html, application/json."));
    }

    #[test]
    fn method_not_allowed_sets_allow() {
        let resp = Response::method_not_allowed(&["POST".to_string()]);
        assert_eq!(resp.status, 405);
        assert_eq!(resp.header("allow"), Some("POST"));
    }

    #[test]
    fn with_header_replaces() {
        let resp = Response::ok("text/html", "x").with_header("content-type", "application/json");
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert_eq!(resp.headers.len(), 1);
    }
}
