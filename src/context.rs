//! The per-request handler context and its capability extension point.
//!
//! A [`Context`] is a fixed base (request, logger, reply builder) plus an
//! open [`Capabilities`] map. Capabilities are deployment-specific helpers
//! (a database pool, a feature-flag client) produced once per request by a
//! [`CapabilityProvider`] and looked up by name and type:
//!
//! ```rust,ignore
//! let db = ctx.capability::<Pool>("db").ok_or_else(HandlerError::unknown)?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::logger::{Logger, SharedLogger};
use crate::request::Request;
use crate::response::{ReplyBuilder, Response};

// ── Capabilities ──────────────────────────────────────────────────────────────

type Capability = Arc<dyn Any + Send + Sync>;

/// Named capabilities injected into a request's context.
#[derive(Clone, Default)]
pub struct Capabilities(HashMap<String, Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` under `name`, replacing any previous entry.
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.0.insert(name.into(), Arc::new(value));
    }

    /// Adds an already shared value without re-wrapping it.
    pub fn insert_shared<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.0.insert(name.into(), value);
    }

    /// Looks up `name` and downcasts it. `None` if absent or of another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.0.get(name).and_then(|c| c.downcast_ref::<T>())
    }

    pub fn get_shared<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.0.get(name).cloned().and_then(|c| c.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges every entry of `other` into `self`.
    pub fn merge(&mut self, other: Capabilities) {
        self.0.extend(other.0);
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Produces the capabilities for one request.
///
/// Attached to the request by the capability-injection middleware and
/// invoked by the wrapper right before the handler runs. Implemented for any
/// `Fn(&Request, &Response) -> Capabilities`.
pub trait CapabilityProvider: Send + Sync + 'static {
    fn provide(&self, req: &Request, res: &Response) -> Capabilities;
}

impl<F> CapabilityProvider for F
where
    F: Fn(&Request, &Response) -> Capabilities + Send + Sync + 'static,
{
    fn provide(&self, req: &Request, res: &Response) -> Capabilities {
        self(req, res)
    }
}

pub type SharedCapabilityProvider = Arc<dyn CapabilityProvider>;

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything a wrapped handler sees of its request.
pub struct Context {
    request: Request,
    logger: SharedLogger,
    reply: ReplyBuilder,
    capabilities: Capabilities,
}

impl Context {
    pub(crate) fn new(
        request: Request,
        logger: SharedLogger,
        reply: ReplyBuilder,
        capabilities: Capabilities,
    ) -> Self {
        Self { request, logger, reply, capabilities }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Shorthand for `ctx.request().get_param(name)`.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.request.get_param(name)
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn reply(&self) -> &ReplyBuilder {
        &self.reply
    }

    pub fn capability<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.capabilities.get(name)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}
