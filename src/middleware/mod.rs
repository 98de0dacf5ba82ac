//! Middleware layer.
//!
//! Middleware intercepts a request before its route handler runs and is the
//! right place for cross-cutting concerns: CORS, request ids, auth headers.
//!
//! # The chain
//!
//! A [`Chain`] is an ordered list of entries plus one driver,
//! [`Chain::run`], that walks the list by index. Each entry gets the same
//! `&mut Request` / `&mut Response` and answers with a [`Flow`]:
//!
//! - [`Flow::Next`] advances to the following entry (or, after the last
//!   one, to the route dispatcher).
//! - [`Flow::Halt`] stops the chain. The entry is expected to have finished
//!   the response itself, as [`Preflight`] does for `OPTIONS`.
//!
//! An `Err` from any entry stops the chain and propagates unchanged to the
//! server, which answers `500`.
//!
//! # The request pipeline
//!
//! [`compose`] builds the chain the server runs on every request, in a fixed
//! order:
//!
//! ```text
//! AttachLogger → user middleware (declaration order) → Inject → route dispatcher
//! ```
//!
//! [`App`](crate::App) appends [`Preflight`] as the last user middleware.

mod preflight;

pub use preflight::{Preflight, PreflightConfig};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::SharedCapabilityProvider;
use crate::error::Error;
use crate::logger::{SharedLogger, TracingLogger};
use crate::request::Request;
use crate::response::{Response, SharedErrorHandler};

/// What the chain should do after an entry returns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Next,
    Halt,
}

/// One entry of a [`Chain`].
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error>;
}

pub type SharedMiddleware = Arc<dyn Middleware>;

// ── Function middleware ───────────────────────────────────────────────────────

/// Builds a middleware from a synchronous closure.
///
/// ```rust
/// use http::{HeaderName, HeaderValue};
/// use tortilla::middleware::{self, Flow};
///
/// let powered_by = middleware::from_fn("powered-by", |_req, res| {
///     res.set_header(
///         HeaderName::from_static("x-powered-by"),
///         HeaderValue::from_static("tortilla"),
///     );
///     Ok(Flow::Next)
/// });
/// ```
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<Flow, Error> + Send + Sync + 'static,
{
    FnMiddleware { name: name.into(), f }
}

pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<Flow, Error> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error> {
        (self.f)(req, res)
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// An ordered list of middleware and the driver that runs it.
#[derive(Clone, Default)]
pub struct Chain {
    entries: Vec<SharedMiddleware>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Returns `self` for chaining.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: SharedMiddleware) {
        self.entries.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|m| m.name())
    }

    /// Runs every entry in order until one halts or fails.
    ///
    /// Returns [`Flow::Next`] when the whole chain passed through (always the
    /// case for an empty chain) and [`Flow::Halt`] when an entry stopped it.
    pub async fn run(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.handle(req, res).await? == Flow::Halt {
                debug!(middleware = entry.name(), index, "chain halted");
                return Ok(Flow::Halt);
            }
        }
        Ok(Flow::Next)
    }
}

impl From<Vec<SharedMiddleware>> for Chain {
    fn from(entries: Vec<SharedMiddleware>) -> Self {
        Self { entries }
    }
}

/// A chain is itself a middleware, so a composed group can be mounted as a
/// single entry of another chain.
#[async_trait]
impl Middleware for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error> {
        self.run(req, res).await
    }
}

// ── Request pipeline ──────────────────────────────────────────────────────────

/// Creates the logger for one request.
pub type LoggerFactory = Arc<dyn Fn(&Request) -> SharedLogger + Send + Sync>;

/// What the request pipeline is built from.
#[derive(Clone)]
pub struct ChainDefinition {
    pub logger: LoggerFactory,
    pub middleware: Vec<SharedMiddleware>,
    pub capabilities: Option<SharedCapabilityProvider>,
    pub error_handler: Option<SharedErrorHandler>,
}

impl Default for ChainDefinition {
    fn default() -> Self {
        Self {
            logger: Arc::new(|_: &Request| -> SharedLogger { Arc::new(TracingLogger::new()) }),
            middleware: Vec::new(),
            capabilities: None,
            error_handler: None,
        }
    }
}

/// Builds the request pipeline: logger attachment first, then the user
/// middleware in declaration order, then capability injection.
pub fn compose(definition: &ChainDefinition) -> Chain {
    let mut chain = Chain::new().with(AttachLogger { factory: Arc::clone(&definition.logger) });
    for middleware in &definition.middleware {
        chain.push(Arc::clone(middleware));
    }
    if definition.capabilities.is_some() || definition.error_handler.is_some() {
        chain.push(Arc::new(Inject {
            capabilities: definition.capabilities.clone(),
            error_handler: definition.error_handler.clone(),
        }));
    }
    chain
}

/// Attaches a fresh logger to the request.
struct AttachLogger {
    factory: LoggerFactory,
}

#[async_trait]
impl Middleware for AttachLogger {
    fn name(&self) -> &str {
        "attach-logger"
    }

    async fn handle(&self, req: &mut Request, _res: &mut Response) -> Result<Flow, Error> {
        let logger = (self.factory)(req);
        req.set_logger(logger);
        Ok(Flow::Next)
    }
}

/// Attaches the capability provider to the request and the error handler
/// to the response, right before the route dispatcher.
struct Inject {
    capabilities: Option<SharedCapabilityProvider>,
    error_handler: Option<SharedErrorHandler>,
}

#[async_trait]
impl Middleware for Inject {
    fn name(&self) -> &str {
        "inject"
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error> {
        if let Some(provider) = &self.capabilities {
            req.set_capability_provider(Arc::clone(provider));
        }
        if let Some(handler) = &self.error_handler {
            res.set_error_handler(Arc::clone(handler));
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::{HeaderName, HeaderValue, Method};

    use super::*;
    use crate::context::Capabilities;
    use crate::error::ReplyError;
    use crate::logger::NoopLogger;
    use crate::response::ReplyBuilder;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn step(trace: &Trace, label: &'static str, flow: Flow) -> SharedMiddleware {
        let trace = Arc::clone(trace);
        Arc::new(from_fn(label, move |_, _| {
            trace.lock().unwrap().push(label);
            Ok(flow)
        }))
    }

    fn request() -> (Request, Response) {
        (Request::new(Method::GET, "/".parse().unwrap()), Response::new())
    }

    async fn run_then_dispatch(chain: &Chain, trace: &Trace) -> Flow {
        let (mut req, mut res) = request();
        let flow = chain.run(&mut req, &mut res).await.unwrap();
        if flow == Flow::Next {
            trace.lock().unwrap().push("D");
        }
        flow
    }

    #[tokio::test]
    async fn entries_run_in_order_then_dispatch() {
        let trace = Trace::default();
        let chain = Chain::from(vec![
            step(&trace, "A", Flow::Next),
            step(&trace, "B", Flow::Next),
            step(&trace, "C", Flow::Next),
        ]);

        assert_eq!(run_then_dispatch(&chain, &trace).await, Flow::Next);
        assert_eq!(*trace.lock().unwrap(), ["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn halting_entry_stops_the_chain() {
        let trace = Trace::default();
        let chain = Chain::from(vec![
            step(&trace, "A", Flow::Next),
            step(&trace, "B", Flow::Halt),
            step(&trace, "C", Flow::Next),
        ]);

        assert_eq!(run_then_dispatch(&chain, &trace).await, Flow::Halt);
        assert_eq!(*trace.lock().unwrap(), ["A", "B"]);
    }

    #[tokio::test]
    async fn empty_chain_passes_through() {
        let trace = Trace::default();
        assert_eq!(run_then_dispatch(&Chain::new(), &trace).await, Flow::Next);
        assert_eq!(*trace.lock().unwrap(), ["D"]);
    }

    #[tokio::test]
    async fn entries_share_request_and_response() {
        let chain = Chain::new()
            .with(from_fn("writer", |req, res| {
                req.params_mut().insert("seen", crate::request::Param::path("yes"));
                res.set_header(HeaderName::from_static("x-a"), HeaderValue::from_static("1"));
                Ok(Flow::Next)
            }))
            .with(from_fn("reader", |req, res| {
                assert_eq!(req.get_param("seen"), Some("yes"));
                assert_eq!(res.header("x-a"), Some("1"));
                res.set_header(HeaderName::from_static("x-b"), HeaderValue::from_static("2"));
                Ok(Flow::Next)
            }));

        let (mut req, mut res) = request();
        chain.run(&mut req, &mut res).await.unwrap();
        assert_eq!(res.header("x-a"), Some("1"));
        assert_eq!(res.header("x-b"), Some("2"));
    }

    #[tokio::test]
    async fn errors_propagate_and_stop_the_chain() {
        let trace = Trace::default();
        let chain = Chain::from(vec![
            Arc::new(from_fn("boom", |_, _| Err(Error::middleware("boom", "exploded")))) as SharedMiddleware,
            step(&trace, "after", Flow::Next),
        ]);

        let (mut req, mut res) = request();
        let err = chain.run(&mut req, &mut res).await.unwrap_err();
        assert!(matches!(err, Error::Middleware { ref name, .. } if name == "boom"));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nested_chain_runs_as_one_entry() {
        let trace = Trace::default();
        let inner = Chain::from(vec![step(&trace, "B", Flow::Next), step(&trace, "C", Flow::Next)]);
        let outer = Chain::from(vec![step(&trace, "A", Flow::Next)]).with(inner);

        run_then_dispatch(&outer, &trace).await;
        assert_eq!(*trace.lock().unwrap(), ["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn compose_orders_logger_user_then_injection() {
        let user = from_fn("user", |req, _| {
            assert!(req.logger().is_some(), "logger must be attached before user middleware");
            assert!(req.capability_provider().is_none(), "capabilities come after user middleware");
            Ok(Flow::Next)
        });
        let definition = ChainDefinition {
            logger: Arc::new(|_: &Request| NoopLogger::shared()),
            middleware: vec![Arc::new(user)],
            capabilities: Some(Arc::new(|_: &Request, _: &Response| Capabilities::new())),
            error_handler: Some(Arc::new(
                |s: u16, m: &str, r: &ReplyBuilder| -> Result<(), ReplyError> { r.reply(s, m) },
            )),
        };

        let chain = compose(&definition);
        assert_eq!(chain.names().collect::<Vec<_>>(), ["attach-logger", "user", "inject"]);

        let (mut req, mut res) = request();
        assert_eq!(chain.run(&mut req, &mut res).await.unwrap(), Flow::Next);
        assert!(req.capability_provider().is_some());
        assert!(res.error_handler().is_some());
    }

    #[tokio::test]
    async fn compose_without_injection_only_attaches_logger() {
        let chain = compose(&ChainDefinition::default());
        assert_eq!(chain.len(), 1);

        let (mut req, mut res) = request();
        chain.run(&mut req, &mut res).await.unwrap();
        assert!(req.logger().is_some());
    }
}
