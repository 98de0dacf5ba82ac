//! Service bootstrap.
//!
//! An [`App`] is the whole service definition: settings, routes, the
//! request pipeline and the lifecycle events. [`App::run`] takes it from
//! startup to an [`ExitCode`]:
//!
//! ```text
//! validate → on_server_start → bind → after_start → serve ──signal──▶ terminate → 0
//!     └──────────── any failure ────────────┘          └──uncaught panic──▶ on_error → 99
//!                      ↓
//!                     999
//! ```
//!
//! The request pipeline is fixed in shape: per-request logger first, user
//! middleware in declaration order, the preflight middleware, then
//! capability injection right before the route dispatcher.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Settings;
use crate::context::CapabilityProvider;
use crate::error::{Error, Fatal};
use crate::logger::{SharedLogger, TracingLogger};
use crate::middleware::{ChainDefinition, Middleware, Preflight, compose};
use crate::request::Request;
use crate::response::ErrorHandler;
use crate::router::Router;
use crate::server::{Pipeline, Server, Supervisor};
use crate::shutdown::{ErrorCallback, ExitCode, Hook, ShutdownCoordinator, Signals};

/// A service definition.
///
/// ```rust,no_run
/// use http::Method;
/// use tortilla::{App, Context, HandlerError, Router, Settings, wrap};
///
/// async fn ping(ctx: Context) -> Result<(), HandlerError> {
///     ctx.reply().ok("pong")?;
///     Ok(())
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let code = App::new(Settings::default())
///         .routes(Router::new().on(Method::GET, "/ping", wrap(ping)))
///         .run()
///         .await;
///     code.exit();
/// }
/// ```
pub struct App {
    settings: Settings,
    router: Router,
    pipeline: ChainDefinition,
    on_server_start: Option<Hook>,
    after_start: Option<Hook>,
    on_terminate: Option<Hook>,
    on_error: Option<ErrorCallback>,
    logger: SharedLogger,
    supervisor: Supervisor,
    panics: mpsc::UnboundedReceiver<String>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let (supervisor, panics) = Supervisor::channel();
        Self {
            settings,
            router: Router::new(),
            pipeline: ChainDefinition::default(),
            on_server_start: None,
            after_start: None,
            on_terminate: None,
            on_error: None,
            logger: Arc::new(TracingLogger::process()),
            supervisor,
            panics,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Spawns background tasks whose panics count as uncaught errors of
    /// this service. Valid before and after [`App::start`].
    pub fn supervisor(&self) -> Supervisor {
        self.supervisor.clone()
    }

    pub fn routes(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends a user middleware. Runs after the logger is attached and
    /// before preflight handling.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.pipeline.middleware.push(Arc::new(middleware));
        self
    }

    /// Replaces the per-request logger factory. The default gives every
    /// request a [`TracingLogger`] with a fresh id.
    pub fn request_logger<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Request) -> SharedLogger + Send + Sync + 'static,
    {
        self.pipeline.logger = Arc::new(factory);
        self
    }

    pub fn capabilities(mut self, provider: impl CapabilityProvider) -> Self {
        self.pipeline.capabilities = Some(Arc::new(provider));
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.pipeline.error_handler = Some(Arc::new(handler));
        self
    }

    /// Runs before the socket is bound. An error aborts startup.
    pub fn on_server_start(mut self, hook: Hook) -> Self {
        self.on_server_start = Some(hook);
        self
    }

    /// Runs once, after the socket is bound and before the first accept.
    /// An error aborts startup.
    pub fn after_start(mut self, hook: Hook) -> Self {
        self.after_start = Some(hook);
        self
    }

    pub fn on_terminate(mut self, hook: Hook) -> Self {
        self.on_terminate = Some(hook);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// The logger for process-level events: startup, termination and
    /// fatal errors.
    pub fn process_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    /// The coordinator this service terminates with.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        let mut coordinator = ShutdownCoordinator::new(self.settings.terminate_timeout())
            .logger(Arc::clone(&self.logger));
        if let Some(hook) = &self.on_terminate {
            coordinator = coordinator.on_terminate(Arc::clone(hook));
        }
        if let Some(callback) = &self.on_error {
            coordinator = coordinator.on_error(Arc::clone(callback));
        }
        coordinator
    }

    fn validate(&self) -> Result<(), Error> {
        if self.settings.name.trim().is_empty() {
            return Err(Error::Definition("service name is empty".to_owned()));
        }
        if self.settings.terminate_timeout_ms == 0 {
            return Err(Error::Definition("terminate_timeout_ms must be positive".to_owned()));
        }
        Ok(())
    }

    /// Everything up to the first accept. On success the socket is bound
    /// and `after_start` has run.
    pub async fn start(self) -> Result<Started, Fatal> {
        self.validate().map_err(Fatal::Startup)?;

        let mut definition = self.pipeline;
        let preflight = Preflight::new(self.settings.preflight.clone()).map_err(Fatal::Startup)?;
        definition.middleware.push(Arc::new(preflight));
        let pipeline = Pipeline::new(compose(&definition), self.router);

        if let Some(hook) = &self.on_server_start {
            run_hook("on_server_start", hook).await?;
        }

        let addr = (self.settings.host.as_str(), self.settings.port);
        let server = Server::bind(addr)
            .await
            .map_err(Fatal::Startup)?
            .supervised_by(self.supervisor, self.panics);

        if let Some(hook) = &self.after_start {
            run_hook("after_start", hook).await?;
        }

        self.logger.info(&format!(
            "{} started on {}",
            self.settings.name,
            server.local_addr()
        ));
        Ok(Started { server, pipeline })
    }

    /// Runs the service until it terminates and returns the exit code.
    ///
    /// Signals received while the termination hook runs are logged and
    /// ignored.
    pub async fn run(self) -> ExitCode {
        let coordinator = Arc::new(self.coordinator());

        let mut signals = match Signals::install() {
            Ok(signals) => signals,
            Err(err) => return coordinator.fail(Fatal::Startup(err)).await,
        };

        let started = match self.start().await {
            Ok(started) => started,
            Err(fatal) => return coordinator.fail(fatal).await,
        };

        let served = started.serve(signals.recv()).await;
        match served {
            Ok(signal) => {
                let repeat = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    loop {
                        let again = signals.recv().await;
                        repeat.terminate(again).await;
                    }
                });
                coordinator
                    .terminate(signal)
                    .await
                    .map_or(ExitCode::Success, |t| t.exit_code)
            }
            Err(fatal) => coordinator.fail(fatal).await,
        }
    }
}

/// A bound service that has not started accepting yet.
pub struct Started {
    server: Server,
    pipeline: Pipeline,
}

impl Started {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Serves until `shutdown` resolves. See [`Server::serve`].
    pub async fn serve<S>(self, shutdown: impl Future<Output = S>) -> Result<S, Fatal> {
        self.server.serve(self.pipeline, shutdown).await
    }
}

async fn run_hook(name: &'static str, hook: &Hook) -> Result<(), Fatal> {
    hook()
        .await
        .map_err(|source| Fatal::Startup(Error::Hook { hook: name, source }))
}
