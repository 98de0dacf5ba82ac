//! Incoming HTTP request type.
//!
//! A [`Request`] is built once per connection-level request and handed by
//! `&mut` through the middleware chain, then by value to the wrapped
//! handler. Middleware uses the setters to attach the request's logger and
//! capability provider; handlers only read.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::context::SharedCapabilityProvider;
use crate::logger::SharedLogger;

// ── Params ────────────────────────────────────────────────────────────────────

/// Where a parameter value came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamLocation {
    Path,
    Query,
}

/// One resolved parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Param {
    pub value: String,
    pub location: ParamLocation,
}

impl Param {
    pub fn path(value: impl Into<String>) -> Self {
        Self { value: value.into(), location: ParamLocation::Path }
    }

    pub fn query(value: impl Into<String>) -> Self {
        Self { value: value.into(), location: ParamLocation::Query }
    }
}

/// Matched parameters keyed by name.
#[derive(Clone, Debug, Default)]
pub struct Params(HashMap<String, Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw query string. Repeated keys keep the first value.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .0
                .entry(name.into_owned())
                .or_insert_with(|| Param::query(value));
        }
        params
    }

    pub fn insert(&mut self, name: impl Into<String>, param: Param) {
        self.0.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.0.get(name)
    }

    /// The `value` of the named parameter, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|p| p.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: Params,
    remote_addr: Option<SocketAddr>,
    logger: Option<SharedLogger>,
    capabilities: Option<SharedCapabilityProvider>,
}

impl Request {
    /// A bodiless request. Query-string parameters are parsed from `uri`.
    pub fn new(method: Method, uri: Uri) -> Self {
        let params = uri.query().map(Params::from_query).unwrap_or_default();
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            params,
            remote_addr: None,
            logger: None,
            capabilities: None,
        }
    }

    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let mut req = Self::new(parts.method, parts.uri);
        req.headers = parts.headers;
        req.body = body;
        req
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, param: Param) -> Self {
        self.params.insert(name, param);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Resolves a named parameter from the matched parameter store.
    ///
    /// For a route `/users/{id}`, `req.get_param("id")` on `/users/42`
    /// returns `Some("42")`. Unknown names return `None`.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params.value(name)
    }

    pub fn params(&self) -> &Params { &self.params }
    pub fn params_mut(&mut self) -> &mut Params { &mut self.params }

    pub fn logger(&self) -> Option<&SharedLogger> {
        self.logger.as_ref()
    }

    pub fn set_logger(&mut self, logger: SharedLogger) {
        self.logger = Some(logger);
    }

    pub fn capability_provider(&self) -> Option<&SharedCapabilityProvider> {
        self.capabilities.as_ref()
    }

    pub fn set_capability_provider(&mut self, provider: SharedCapabilityProvider) {
        self.capabilities = Some(provider);
    }

    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// Adds matched path parameters. Path values win over query values.
    pub(crate) fn merge_path_params<'a, 'b>(&mut self, matched: impl Iterator<Item = (&'a str, &'b str)>) {
        for (name, value) in matched {
            self.params.insert(name, Param::path(value));
        }
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request {
        Request::new(Method::GET, uri.parse().unwrap())
    }

    #[test]
    fn get_param_reads_nested_value() {
        let req = get("/users/42").with_param("id", Param::path("42"));
        assert_eq!(req.get_param("id"), Some("42"));
    }

    #[test]
    fn get_param_missing_is_none() {
        assert_eq!(get("/").get_param("id"), None);
        let req = get("/").with_param("other", Param::path("x"));
        assert_eq!(req.get_param("id"), None);
    }

    #[test]
    fn query_params_are_parsed() {
        let req = get("/search?q=rust+lang&page=2&q=ignored");
        assert_eq!(req.get_param("q"), Some("rust lang"));
        assert_eq!(req.get_param("page"), Some("2"));
        assert_eq!(req.params().get("page").unwrap().location, ParamLocation::Query);
    }

    #[test]
    fn path_params_override_query() {
        let mut req = get("/users/7?id=9");
        req.merge_path_params([("id", "7")].into_iter());
        assert_eq!(req.get_param("id"), Some("7"));
        assert_eq!(req.params().get("id").unwrap().location, ParamLocation::Path);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = get("/").with_header(http::header::ORIGIN, HeaderValue::from_static("a"));
        assert_eq!(req.header("Origin"), Some("a"));
        assert_eq!(req.header("origin"), Some("a"));
    }
}
