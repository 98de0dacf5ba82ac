//! Operation trait, type erasure, and the request wrapper.
//!
//! # From `async fn` to reply
//!
//! ```text
//! async fn get_user(ctx: Context) -> Result<(), HandlerError> { … }
//!        ↓ wrap(get_user)
//! Wrapper { operation: Arc<FnOperation(get_user)> }     ← stored in the router
//!        ↓ wrapper.call(req, res) at request time
//! logger + capabilities + ReplyBuilder → Context
//!        ↓
//! get_user(ctx).await
//!        ↓ Err(e)?
//! ErrorEnvelope → error handler or reply(status, message)
//!        ↓
//! Response (exactly one reply, never a panic from a failed send)
//! ```
//!
//! Every request-scoped failure stops here. Nothing a handler returns, and
//! no panic inside it, can take the process down.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Capabilities, Context};
use crate::error::HandlerError;
use crate::logger::{Logger, NoopLogger, SharedLogger};
use crate::request::Request;
use crate::response::{ErrorHandler, ReplyBuilder, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
#[doc(hidden)]
pub trait ErasedOperation {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>>;
}

#[doc(hidden)]
pub type BoxedOperation = Arc<dyn ErasedOperation + Send + Sync + 'static>;

// ── Public Operation trait ────────────────────────────────────────────────────

/// Implemented for every valid route operation.
///
/// You never implement this yourself. It is satisfied by any function with
/// the shape
///
/// ```text
/// async fn name(ctx: Context) -> Result<(), E>   where E: Into<HandlerError>
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Operation: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_operation(self) -> BoxedOperation;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, E> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
}

impl<F, Fut, E> Operation for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    fn into_boxed_operation(self) -> BoxedOperation {
        Arc::new(FnOperation(self))
    }
}

struct FnOperation<F>(F);

impl<F, Fut, E> ErasedOperation for FnOperation<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<HandlerError> + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<(), HandlerError>> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

// ── Wrapper ───────────────────────────────────────────────────────────────────

/// Wraps `operation` so it can be mounted on a [`Router`](crate::Router).
pub fn wrap(operation: impl Operation) -> Wrapper {
    Wrapper::wrap(operation)
}

/// A wrapped route handler.
///
/// The default wrapper has no operation and replies `200` with no payload.
#[derive(Clone, Default)]
pub struct Wrapper {
    operation: Option<BoxedOperation>,
}

impl Wrapper {
    pub fn wrap(operation: impl Operation) -> Self {
        Self { operation: Some(operation.into_boxed_operation()) }
    }

    /// Runs the wrapped operation for one request and returns the response
    /// holding its single reply.
    ///
    /// A panic in the capability provider or the operation is recovered and
    /// answered like [`HandlerError::unknown`].
    pub async fn call(&self, req: Request, res: Response) -> Response {
        let logger = req.logger().cloned().unwrap_or_else(NoopLogger::shared);
        logger.info("Start Request");

        let capabilities = match req.capability_provider() {
            Some(provider) => panic::catch_unwind(AssertUnwindSafe(|| provider.provide(&req, &res))).ok(),
            None => Some(Capabilities::new()),
        };
        let error_handler = res.error_handler().cloned();
        let reply = ReplyBuilder::new(res);

        let outcome = match capabilities {
            None => {
                logger.error("Capability provider panicked");
                Err(HandlerError::unknown())
            }
            Some(capabilities) => {
                let ctx = Context::new(req, Arc::clone(&logger), reply.clone(), capabilities);
                match &self.operation {
                    Some(operation) => recover(operation.call(ctx), &logger).await,
                    None => ctx.reply().ok(()).map_err(HandlerError::from),
                }
            }
        };

        match outcome {
            Ok(()) => logger.info("End Request"),
            Err(err) => send_error(&err, &reply, error_handler.as_deref(), logger.as_ref()),
        }

        reply.take_response()
    }
}

/// Drives the operation on its own task so a panic ends there.
async fn recover(
    operation: BoxFuture<'static, Result<(), HandlerError>>,
    logger: &SharedLogger,
) -> Result<(), HandlerError> {
    match tokio::spawn(operation).await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            logger.error(&format!("Operation panicked: {join_err}"));
            Err(HandlerError::unknown())
        }
    }
}

/// Sends the error reply for `err`. A failure while sending is logged and
/// swallowed; there is no second attempt.
fn send_error(
    err: &HandlerError,
    reply: &ReplyBuilder,
    error_handler: Option<&dyn ErrorHandler>,
    logger: &dyn Logger,
) {
    let envelope = err.envelope();
    match err.source() {
        Some(source) => logger.error_with(&format!("{} ({})", envelope.message, envelope.status), source),
        None => logger.error(&err.to_string()),
    }

    let sent = match error_handler {
        Some(handler) => {
            panic::catch_unwind(AssertUnwindSafe(|| {
                handler.handle(envelope.status, &envelope.message, reply)
            }))
            .unwrap_or_else(|_| {
                logger.error("Failed to send API response: error handler panicked");
                Ok(())
            })
        }
        None => reply.reply(envelope.status, envelope.message.as_str()),
    };

    if let Err(send_err) = sent {
        logger.error(&format!("Failed to send API response: {send_err}"));
    }
}
