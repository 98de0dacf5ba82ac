//! # tortilla
//!
//! Request wrapping, middleware composition and graceful shutdown for HTTP
//! API services on hyper.
//!
//! ## The contract
//!
//! A handler is an async function that takes a [`Context`] and returns
//! `Result<(), E>`. It replies through [`Context::reply`]; if it fails, the
//! [`Wrapper`] turns the error into exactly one error reply. Handlers never
//! see a global logger or a global client: the middleware chain attaches a
//! per-request [`Logger`] and a set of [`Capabilities`] before the route
//! dispatcher runs.
//!
//! What the crate owns:
//!
//! - Request wrapping: logging, capability resolution, error normalisation
//! - Middleware chain: logger first, user middleware, preflight, injection
//! - Preflight: CORS headers and `OPTIONS` short-circuit
//! - Shutdown: signal handling, a bounded termination hook, exit codes
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use tortilla::{App, Capabilities, Context, HandlerError, Router, Settings, wrap};
//!
//! #[derive(Clone)]
//! struct Version(&'static str);
//!
//! #[tokio::main]
//! async fn main() {
//!     let routes = Router::new()
//!         .on(Method::GET, "/users/{id}", wrap(get_user))
//!         .on(Method::GET, "/about", wrap(about));
//!
//!     App::new(Settings::default())
//!         .routes(routes)
//!         .capabilities(|_: &tortilla::Request, _: &tortilla::Response| {
//!             Capabilities::new().with("version", Version("1.0.0"))
//!         })
//!         .run()
//!         .await
//!         .exit();
//! }
//!
//! async fn get_user(ctx: Context) -> Result<(), HandlerError> {
//!     let id = ctx.get_param("id").ok_or_else(|| HandlerError::bad_request("missing id"))?;
//!     ctx.logger().info(&format!("looking up {id}"));
//!     ctx.reply().ok(serde_json::json!({ "id": id }))?;
//!     Ok(())
//! }
//!
//! async fn about(ctx: Context) -> Result<(), HandlerError> {
//!     let version = ctx.capability::<Version>("version").map_or("unknown", |v| v.0);
//!     ctx.reply().ok(version)?;
//!     Ok(())
//! }
//! ```

mod app;
mod context;
mod error;
mod handler;
mod logger;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod logging;
pub mod middleware;
pub mod shutdown;

pub use app::{App, Started};
pub use config::Settings;
pub use context::{Capabilities, CapabilityProvider, Context};
pub use error::{BoxError, DEFAULT_ERROR_MESSAGE, Error, ErrorEnvelope, Fatal, HandlerError, ReplyError};
pub use handler::{Operation, Wrapper, wrap};
pub use logger::{Logger, NoopLogger, SharedLogger, TracingLogger};
pub use request::{Param, ParamLocation, Params, Request};
pub use response::{ErrorHandler, Payload, ReplyBuilder, Response};
pub use router::Router;
pub use server::{Pipeline, Server, Supervisor};
pub use shutdown::{ExitCode, ShutdownCoordinator, Signal};
