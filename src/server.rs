//! HTTP server and per-request dispatch.
//!
//! Every request takes the same path:
//!
//! ```text
//! hyper request → Request (body collected)
//!        ↓
//! middleware chain ──Halt──▶ response as the middleware left it
//!        ↓ Next                 (Err ──▶ 500 "An internal error has occurred.")
//! router lookup ──miss──▶ 404
//!        ↓ hit
//! Wrapper::call → exactly one reply
//! ```
//!
//! Handler panics are recovered by the [`Wrapper`](crate::Wrapper). A panic
//! anywhere else in a connection, an HTTP/2 stream or a task started through
//! the [`Supervisor`] is not request-scoped: it ends [`Server::serve`] with
//! [`Fatal::Uncaught`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Fatal};
use crate::middleware::{Chain, Flow};
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

const INTERNAL_ERROR_MESSAGE: &str = "An internal error has occurred.";

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// The middleware chain and the router, run in that order for every request.
pub struct Pipeline {
    chain: Chain,
    router: Router,
}

impl Pipeline {
    pub fn new(chain: Chain, router: Router) -> Self {
        Self { chain, router }
    }

    /// Produces the response for one request.
    pub async fn handle(&self, mut req: Request) -> Response {
        let mut res = Response::new();

        match self.chain.run(&mut req, &mut res).await {
            Ok(Flow::Next) => {}
            Ok(Flow::Halt) => {
                if !res.is_sent() {
                    warn!(path = req.path(), "middleware halted the chain without replying");
                }
                return res;
            }
            Err(err) => {
                error!(path = req.path(), error = %err, "An unhandled exception has occurred");
                let mut res = Response::new();
                let _ = res.send(500, INTERNAL_ERROR_MESSAGE);
                return res;
            }
        }

        let path = req.path().to_owned();
        let Some((wrapper, params)) = self.router.lookup(req.method(), &path) else {
            if let Err(err) = res.send(404, "Not Found") {
                debug!(path = %path, error = %err, "no route and response already sent");
            }
            return res;
        };
        req.merge_path_params(params.into_iter());

        let mut res = wrapper.call(req, res).await;
        if !res.is_sent() {
            warn!(path = %path, "handler completed without replying");
            let _ = res.send(500, "No reply was sent");
        }
        res
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

/// Spawns connection, stream and background tasks, and reports every one
/// that panics to the server that owns it.
///
/// It is also hyper's executor, so HTTP/2 streams land here too. Clone it
/// into capabilities to supervise background work started by handlers:
///
/// ```rust,ignore
/// let supervisor = app.supervisor();
/// supervisor.spawn(async move { refresh_cache().await });
/// ```
#[derive(Clone)]
pub struct Supervisor {
    panics: mpsc::UnboundedSender<String>,
}

impl Supervisor {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (panics, rx) = mpsc::unbounded_channel();
        (Self { panics }, rx)
    }

    /// Runs `task` detached. If it panics, the server stops with
    /// [`Fatal::Uncaught`].
    pub fn spawn<F>(&self, task: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let panics = self.panics.clone();
        let handle = tokio::spawn(task);
        tokio::spawn(async move {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    let _ = panics.send(format!("task panicked: {join_err}"));
                }
            }
        });
    }
}

impl<F> hyper::rt::Executor<F> for Supervisor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        self.spawn(fut);
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server.
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    supervisor: Supervisor,
    panics: mpsc::UnboundedReceiver<String>,
}

impl Server {
    /// Binds the listening socket.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (supervisor, panics) = Supervisor::channel();
        Ok(Self { listener, addr, supervisor, panics })
    }

    /// Replaces the supervisor, for one handed out before binding.
    pub(crate) fn supervised_by(
        mut self,
        supervisor: Supervisor,
        panics: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        self.supervisor = supervisor;
        self.panics = panics;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn supervisor(&self) -> Supervisor {
        self.supervisor.clone()
    }

    /// Accepts connections and dispatches them through `pipeline` until
    /// `shutdown` resolves, then stops accepting and returns its output.
    ///
    /// In-flight connections are detached, not cancelled: they keep running
    /// until they finish or the process exits. A panic in any supervised
    /// task ends serving with [`Fatal::Uncaught`].
    pub async fn serve<S>(
        mut self,
        pipeline: Pipeline,
        shutdown: impl Future<Output = S>,
    ) -> Result<S, Fatal> {
        let pipeline = Arc::new(pipeline);

        info!(addr = %self.addr, "tortilla listening");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal immediately stops accepting,
                // even if more connections are queued.
                biased;

                out = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting");
                    return Ok(out);
                }

                Some(panic) = self.panics.recv() => {
                    return Err(Fatal::Uncaught(panic));
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let pipeline = Arc::clone(&pipeline);
                    let supervisor = self.supervisor.clone();
                    let io = TokioIo::new(stream);

                    self.supervisor.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let pipeline = Arc::clone(&pipeline);
                            async move { dispatch(pipeline, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(supervisor)
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }
            }
        }
    }
}

/// Converts between hyper and tortilla types around [`Pipeline::handle`].
///
/// The error type is [`Infallible`]: every failure becomes a response.
async fn dispatch(
    pipeline: Arc<Pipeline>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, method = %method, path = %path, "failed to read request body: {e}");
            let mut res = Response::new();
            let _ = res.send(400, "Invalid request body");
            return Ok(res.into_inner());
        }
    };

    let mut req = Request::from_parts(parts, body);
    req.set_remote_addr(remote_addr);

    let res = pipeline.handle(req).await;
    info!(
        method = %method,
        path = %path,
        status = res.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    Ok(res.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::{Method, StatusCode};

    use super::*;
    use crate::context::Context;
    use crate::error::HandlerError;
    use crate::handler::wrap;
    use crate::middleware::{Preflight, PreflightConfig, from_fn};

    async fn echo_id(ctx: Context) -> Result<(), HandlerError> {
        let id = ctx.get_param("id").unwrap_or_default().to_owned();
        ctx.reply().ok(id)?;
        Ok(())
    }

    async fn silent(_: Context) -> Result<(), HandlerError> {
        Ok(())
    }

    fn router() -> Router {
        Router::new()
            .on(Method::GET, "/users/{id}", wrap(echo_id))
            .on(Method::GET, "/silent", wrap(silent))
    }

    fn get(uri: &str) -> Request {
        Request::new(Method::GET, uri.parse().unwrap())
    }

    #[tokio::test]
    async fn routes_through_chain_to_handler() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&trace);
        let chain = Chain::new().with(from_fn("trace", move |req, _| {
            seen.lock().unwrap().push(req.path().to_owned());
            Ok(Flow::Next)
        }));

        let res = Pipeline::new(chain, router()).handle(get("/users/42")).await;

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"42");
        assert_eq!(*trace.lock().unwrap(), ["/users/42"]);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let res = Pipeline::new(Chain::new(), router()).handle(get("/nope")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn halted_chain_never_reaches_router() {
        let chain = Chain::new().with(Preflight::new(PreflightConfig::default()).unwrap());
        let req = Request::new(Method::OPTIONS, "/users/42".parse().unwrap());

        let res = Pipeline::new(chain, router()).handle(req).await;

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn middleware_error_becomes_500() {
        let chain = Chain::new().with(from_fn("broken", |_, _| Err(Error::middleware("broken", "nope"))));
        let res = Pipeline::new(chain, router()).handle(get("/users/1")).await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), INTERNAL_ERROR_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn handler_without_reply_becomes_500() {
        let res = Pipeline::new(Chain::new(), router()).handle(get("/silent")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
