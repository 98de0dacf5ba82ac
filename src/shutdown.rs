//! Process exit and graceful shutdown.
//!
//! # Termination
//!
//! ```text
//! Running ──signal──▶ Terminating ──hook finished or timeout──▶ Exited (code 0)
//! ```
//!
//! On the first of SIGINT, SIGTERM, SIGQUIT or SIGHUP the coordinator runs
//! the `on_terminate` hook and a timer side by side. Whichever finishes
//! first ends the wait. The timer never aborts the hook: the hook keeps
//! running until the process actually exits, the timer only bounds how long
//! exit waits for it. A failing hook is logged and does not block exit.
//!
//! When Kubernetes terminates a pod it sends SIGTERM and waits
//! `terminationGracePeriodSeconds` before SIGKILL. Keep
//! `terminate_timeout_ms` below that.
//!
//! # Fatal errors
//!
//! A [`Fatal`] skips the state machine. Uncaught errors run the optional
//! `on_error` callback (best effort) and end with code 99; startup failures
//! end with code 999.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::error::{BoxError, Error, Fatal};
use crate::handler::BoxFuture;
use crate::logger::{SharedLogger, TracingLogger};

// ── Exit codes ────────────────────────────────────────────────────────────────

/// How the process ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitCode {
    Success,
    UncaughtError,
    StartFailed,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Success       => 0,
            Self::UncaughtError => 99,
            Self::StartFailed   => 999,
        }
    }

    /// Ends the process with this code.
    pub fn exit(self) -> ! {
        std::process::exit(self.code())
    }
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// A termination signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
    Hangup,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit      => "SIGQUIT",
            Self::Hangup    => "SIGHUP",
        })
    }
}

/// Listens for the termination signals.
///
/// Installing the listeners replaces the default OS action, so a signal
/// received while already terminating is delivered here instead of killing
/// the process.
#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn install() -> Result<Self, Error> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Resolves on the next signal received.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::Interrupt,
            _ = self.terminate.recv() => Signal::Terminate,
            _ = self.quit.recv()      => Signal::Quit,
            _ = self.hangup.recv()    => Signal::Hangup,
        }
    }
}

/// On Windows only Ctrl-C is available.
#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> Result<Self, Error> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> Signal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Signal::Interrupt,
            Err(_) => std::future::pending().await,
        }
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// A lifecycle hook: `on_server_start`, `after_start` or `on_terminate`.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// The uncaught-error callback.
pub type ErrorCallback = Arc<dyn Fn(&Fatal) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Boxes an async closure into a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(f()) })
}

/// Boxes an async closure into an [`ErrorCallback`]. The closure gets the
/// error by reference and must not hold on to it across an await.
pub fn error_callback<F, Fut>(f: F) -> ErrorCallback
where
    F: Fn(&Fatal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |err: &Fatal| -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(f(err)) })
}

// ── Coordinator ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownState {
    Running,
    Terminating,
    Exited,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Terminating,
            _ => Self::Exited,
        }
    }
}

/// Which side of the termination race finished first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The hook returned `Ok` (or there was no hook).
    Completed,
    /// The hook returned an error or panicked.
    HookFailed,
    /// The timeout elapsed first.
    TimedOut,
}

/// Result of one termination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Termination {
    pub signal: Signal,
    pub outcome: Outcome,
    pub exit_code: ExitCode,
}

/// Owns the process-wide shutdown state.
///
/// Configured once at startup through the builder methods; afterwards the
/// only mutation is the state transition itself.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    timeout: Duration,
    on_terminate: Option<Hook>,
    on_error: Option<ErrorCallback>,
    logger: SharedLogger,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(ShutdownState::Running as u8),
            timeout,
            on_terminate: None,
            on_error: None,
            logger: Arc::new(TracingLogger::process()),
        }
    }

    pub fn on_terminate(mut self, hook: Hook) -> Self {
        self.on_terminate = Some(hook);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Runs the termination race for `signal`.
    ///
    /// Returns `None` without doing anything if a termination is already
    /// under way or finished.
    pub async fn terminate(&self, signal: Signal) -> Option<Termination> {
        let started = self.state.compare_exchange(
            ShutdownState::Running as u8,
            ShutdownState::Terminating as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if started.is_err() {
            self.logger.warn(&format!("Received {signal} while already terminating, ignoring"));
            return None;
        }

        self.logger.info(&format!("Starting API Termination ({signal})"));

        let hook = self.on_terminate.clone();
        // Spawned so losing the race detaches the hook instead of dropping it.
        let task = tokio::spawn(async move {
            match hook {
                Some(hook) => hook().await,
                None => Ok(()),
            }
        });

        let outcome = tokio::select! {
            biased;

            joined = task => match joined {
                Ok(Ok(())) => {
                    self.logger.info("API terminated successfully");
                    Outcome::Completed
                }
                Ok(Err(err)) => {
                    self.logger.error(&format!("An error occurred in terminate handler: {err}"));
                    Outcome::HookFailed
                }
                Err(join_err) => {
                    self.logger.error(&format!("Terminate handler panicked: {join_err}"));
                    Outcome::HookFailed
                }
            },

            () = tokio::time::sleep(self.timeout) => {
                self.logger.warn("API termination is waiting too long to finish");
                Outcome::TimedOut
            }
        };

        self.state.store(ShutdownState::Exited as u8, Ordering::SeqCst);
        Some(Termination { signal, outcome, exit_code: ExitCode::Success })
    }

    /// Handles a process-scoped failure and returns the code to exit with.
    pub async fn fail(&self, fatal: Fatal) -> ExitCode {
        match &fatal {
            Fatal::Startup(err) => {
                self.logger.error(&format!("Service failed to start: {err}"));
            }
            Fatal::Uncaught(_) => {
                self.logger.error(&format!("An unhandled error has occurred: {fatal}"));
                if let Some(callback) = &self.on_error {
                    let fut = callback(&fatal);
                    match tokio::spawn(fut).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            self.logger.error(&format!("Exception handler failed: {err}"));
                        }
                        Err(join_err) => {
                            self.logger.error(&format!("Exception handler panicked: {join_err}"));
                        }
                    }
                }
            }
        }

        self.state.store(ShutdownState::Exited as u8, Ordering::SeqCst);
        fatal.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;
    use crate::logger::testing::RecordingLogger;

    fn coordinator(timeout_ms: u64, logger: &Arc<RecordingLogger>) -> ShutdownCoordinator {
        ShutdownCoordinator::new(Duration::from_millis(timeout_ms)).logger(logger.clone())
    }

    fn sleeping_hook(ms: u64, done: &Arc<AtomicBool>) -> Hook {
        let done = Arc::clone(done);
        hook(move || {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                done.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::UncaughtError.code(), 99);
        assert_eq!(ExitCode::StartFailed.code(), 999);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_hook_wins_without_warning() {
        let logger = Arc::new(RecordingLogger::default());
        let done = Arc::new(AtomicBool::new(false));
        let coordinator = coordinator(5_000, &logger).on_terminate(sleeping_hook(10, &done));

        let t = coordinator.terminate(Signal::Terminate).await.unwrap();

        assert_eq!(t.outcome, Outcome::Completed);
        assert_eq!(t.exit_code, ExitCode::Success);
        assert!(done.load(Ordering::SeqCst));
        assert!(logger.has("info", "API terminated successfully"));
        assert!(!logger.has("warn", "waiting too long"));
        assert_eq!(coordinator.state(), ShutdownState::Exited);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hook_loses_but_is_not_aborted() {
        let logger = Arc::new(RecordingLogger::default());
        let done = Arc::new(AtomicBool::new(false));
        let coordinator = coordinator(1_000, &logger).on_terminate(sleeping_hook(10_000, &done));

        let t = coordinator.terminate(Signal::Interrupt).await.unwrap();

        assert_eq!(t.outcome, Outcome::TimedOut);
        assert_eq!(t.exit_code, ExitCode::Success);
        assert!(logger.has("warn", "API termination is waiting too long to finish"));
        assert!(!done.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(done.load(Ordering::SeqCst), "hook keeps running after the timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_hook_is_logged_and_still_exits_cleanly() {
        let logger = Arc::new(RecordingLogger::default());
        let coordinator = coordinator(1_000, &logger)
            .on_terminate(hook(|| async { Err::<(), BoxError>("db close failed".into()) }));

        let t = coordinator.terminate(Signal::Hangup).await.unwrap();

        assert_eq!(t.outcome, Outcome::HookFailed);
        assert_eq!(t.exit_code, ExitCode::Success);
        assert!(logger.has("error", "db close failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_hook_completes_immediately() {
        let logger = Arc::new(RecordingLogger::default());
        let t = coordinator(1_000, &logger).terminate(Signal::Quit).await.unwrap();
        assert_eq!(t.outcome, Outcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn second_signal_is_ignored() {
        let logger = Arc::new(RecordingLogger::default());
        let coordinator = coordinator(1_000, &logger);

        assert!(coordinator.terminate(Signal::Terminate).await.is_some());
        assert!(coordinator.terminate(Signal::Interrupt).await.is_none());
        assert!(logger.has("warn", "already terminating"));
    }

    #[tokio::test]
    async fn uncaught_error_runs_callback_and_exits_99() {
        let logger = Arc::new(RecordingLogger::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let coordinator = coordinator(1_000, &logger).on_error(error_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }));

        let code = coordinator.fail(Fatal::Uncaught("boom".into())).await;

        assert_eq!(code, ExitCode::UncaughtError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logger.has("error", "boom"));
    }

    #[tokio::test]
    async fn failing_error_callback_still_exits_99() {
        let logger = Arc::new(RecordingLogger::default());
        let coordinator = coordinator(1_000, &logger)
            .on_error(error_callback(|_| async { Err::<(), BoxError>("alerting down".into()) }));

        let code = coordinator.fail(Fatal::Uncaught("boom".into())).await;

        assert_eq!(code, ExitCode::UncaughtError);
        assert!(logger.has("error", "Exception handler failed: alerting down"));
    }

    #[tokio::test]
    async fn panicking_error_callback_still_exits_99() {
        let logger = Arc::new(RecordingLogger::default());
        fn explode() -> Result<(), BoxError> {
            panic!("callback bug")
        }
        let coordinator = coordinator(1_000, &logger).on_error(error_callback(|_| async { explode() }));

        assert_eq!(coordinator.fail(Fatal::Uncaught("boom".into())).await, ExitCode::UncaughtError);
        assert!(logger.has("error", "Exception handler panicked"));
    }

    #[tokio::test]
    async fn startup_failure_exits_999() {
        let logger = Arc::new(RecordingLogger::default());
        let code = coordinator(1_000, &logger)
            .fail(Fatal::Startup(Error::Definition("port cannot be zero".into())))
            .await;

        assert_eq!(code, ExitCode::StartFailed);
        assert!(logger.has("error", "Service failed to start"));
    }
}
