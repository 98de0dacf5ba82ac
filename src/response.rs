//! Outgoing response, reply shortcuts, and the error-handler override.
//!
//! A [`Response`] accepts exactly one write: either [`Response::send`] or
//! [`Response::end`]. A second attempt fails with
//! [`ReplyError::AlreadySent`] instead of corrupting the wire.
//!
//! Handlers never touch the response directly. They get a
//! [`ReplyBuilder`], a cheap clonable handle with one method per reply code:
//!
//! ```rust,ignore
//! ctx.reply().created(json!({ "id": 42 }))?;
//! ctx.reply().no_content(())?;
//! ctx.reply().reply(409, "conflict")?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::error::ReplyError;

// ── Payload ───────────────────────────────────────────────────────────────────

/// The body of a reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Json(serde_json::Value),
    Bytes(Bytes),
}

impl Payload {
    /// Serialises any `Serialize` value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ReplyError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Text(_) => Some("text/plain; charset=utf-8"),
            Self::Json(_) => Some("application/json"),
            Self::Bytes(_) => Some("application/octet-stream"),
        }
    }

    fn into_bytes(self) -> Result<Bytes, ReplyError> {
        Ok(match self {
            Self::Empty => Bytes::new(),
            Self::Text(s) => Bytes::from(s),
            Self::Json(v) => Bytes::from(serde_json::to_vec(&v)?),
            Self::Bytes(b) => b,
        })
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self { Self::Empty }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Payload {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self { Self::Json(v) }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(Bytes::from(b)) }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response, buffered until the server writes it out.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
    error_handler: Option<SharedErrorHandler>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            sent: false,
            error_handler: None,
        }
    }

    /// A response that refuses every write. Left behind once the wrapper
    /// has taken the real one back from a [`ReplyBuilder`].
    fn closed() -> Self {
        Self { sent: true, ..Self::new() }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn is_sent(&self) -> bool { self.sent }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Writes `payload` with status `code`. Only the first write succeeds.
    pub fn send(&mut self, code: u16, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        if self.sent {
            return Err(ReplyError::AlreadySent);
        }
        let status = StatusCode::from_u16(code).map_err(|_| ReplyError::InvalidStatus(code))?;
        let payload = payload.into();
        let content_type = payload.content_type();
        let body = payload.into_bytes()?;

        if let Some(ct) = content_type {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.status = status;
        self.body = body;
        self.sent = true;
        Ok(())
    }

    /// Finishes the response with its current status and headers, no body.
    pub fn end(&mut self) -> Result<(), ReplyError> {
        if self.sent {
            return Err(ReplyError::AlreadySent);
        }
        self.sent = true;
        Ok(())
    }

    /// Attaches a custom error handler, used by the wrapper instead of the
    /// default reply shortcuts when a handler fails.
    pub fn set_error_handler(&mut self, handler: SharedErrorHandler) {
        self.error_handler = Some(handler);
    }

    pub fn error_handler(&self) -> Option<&SharedErrorHandler> {
        self.error_handler.as_ref()
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl Default for Response {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("sent", &self.sent)
            .finish()
    }
}

// ── ReplyBuilder ──────────────────────────────────────────────────────────────

/// Uniform reply interface over one request's [`Response`].
///
/// Clones share the same underlying response, so only the first reply sent
/// through any of them wins.
#[derive(Clone)]
pub struct ReplyBuilder {
    response: Arc<Mutex<Response>>,
}

impl ReplyBuilder {
    pub fn new(response: Response) -> Self {
        Self { response: Arc::new(Mutex::new(response)) }
    }

    /// Sends `payload` with an arbitrary status code.
    pub fn reply(&self, code: u16, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.lock().send(code, payload)
    }

    pub fn ok(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(200, payload)
    }

    pub fn created(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(201, payload)
    }

    pub fn no_content(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(204, payload)
    }

    pub fn bad_request(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(400, payload)
    }

    pub fn unauthorized(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(401, payload)
    }

    pub fn forbidden(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(403, payload)
    }

    pub fn not_found(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(404, payload)
    }

    pub fn internal_server_error(&self, payload: impl Into<Payload>) -> Result<(), ReplyError> {
        self.reply(500, payload)
    }

    /// Sets a header on the underlying response.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().set_header(name, value);
    }

    pub fn is_sent(&self) -> bool {
        self.lock().is_sent()
    }

    /// Takes the response back, leaving a closed one in its place so any
    /// clone still held by the handler can no longer write.
    pub(crate) fn take_response(&self) -> Response {
        std::mem::replace(&mut *self.lock(), Response::closed())
    }

    fn lock(&self) -> MutexGuard<'_, Response> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Error handler override ────────────────────────────────────────────────────

/// Custom strategy for sending an error reply.
///
/// Receives the failure's status code and message plus the reply builder,
/// so it can answer in a different shape than the default
/// `reply(status, message)`.
///
/// Implemented for any `Fn(u16, &str, &ReplyBuilder) -> Result<(), ReplyError>`.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, status: u16, message: &str, reply: &ReplyBuilder) -> Result<(), ReplyError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(u16, &str, &ReplyBuilder) -> Result<(), ReplyError> + Send + Sync + 'static,
{
    fn handle(&self, status: u16, message: &str, reply: &ReplyBuilder) -> Result<(), ReplyError> {
        self(status, message, reply)
    }
}

pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shortcuts_use_fixed_codes() {
        let cases: [(fn(&ReplyBuilder) -> Result<(), ReplyError>, u16); 8] = [
            (|r| r.ok(()), 200),
            (|r| r.created(()), 201),
            (|r| r.no_content(()), 204),
            (|r| r.bad_request(()), 400),
            (|r| r.unauthorized(()), 401),
            (|r| r.forbidden(()), 403),
            (|r| r.not_found(()), 404),
            (|r| r.internal_server_error(()), 500),
        ];
        for (call, code) in cases {
            let reply = ReplyBuilder::new(Response::new());
            call(&reply).unwrap();
            assert_eq!(reply.take_response().status().as_u16(), code);
        }
    }

    #[test]
    fn second_send_is_rejected() {
        let reply = ReplyBuilder::new(Response::new());
        reply.ok("first").unwrap();
        assert!(matches!(reply.created("second"), Err(ReplyError::AlreadySent)));

        let res = reply.take_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"first");
    }

    #[test]
    fn json_payload_sets_content_type() {
        let reply = ReplyBuilder::new(Response::new());
        reply.ok(json!({ "id": 1 })).unwrap();
        let res = reply.take_response();
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.header("content-length"), Some("8"));
        assert_eq!(res.body().as_ref(), br#"{"id":1}"#);
    }

    #[test]
    fn invalid_status_is_an_error() {
        let mut res = Response::new();
        assert!(matches!(res.send(42, ()), Err(ReplyError::InvalidStatus(42))));
        assert!(!res.is_sent());
    }

    #[test]
    fn taken_response_leaves_closed_handle() {
        let reply = ReplyBuilder::new(Response::new());
        let leaked = reply.clone();
        let _ = reply.take_response();
        assert!(matches!(leaked.ok(()), Err(ReplyError::AlreadySent)));
    }

    #[test]
    fn end_is_single_write() {
        let mut res = Response::new();
        res.end().unwrap();
        assert!(matches!(res.end(), Err(ReplyError::AlreadySent)));
        assert!(matches!(res.send(200, ()), Err(ReplyError::AlreadySent)));
    }
}
