//! # Ingestion Lifecycle
//!
//! Owns the one background ingestion task a process runs.
//!
//! `start` spawns the session next to the request-serving tasks and keeps its
//! `JoinHandle`; a second `start` is refused. `shutdown` is best-effort
//! abandonment: the session's token is cancelled and the task aborted without
//! waiting for in-flight messages. Telemetry delivery is at-most-once, so a
//! message lost at shutdown is acceptable.
//!
//! A session that ends on its own (bus connection refused or lost) is not
//! restarted here. Whoever supervises the process decides whether to restart it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Misuse of the lifecycle controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called after a session had already been spawned.
    #[error("The ingestion loop is already started for this process")]
    AlreadyStarted,
}

/// Cloneable view of whether the ingestion task is alive, for health checks.
#[derive(Debug, Clone, Default)]
pub struct IngestionStatus {
    running: Arc<AtomicBool>,
}

impl IngestionStatus {
    /// `true` between `start` and the end (or abandonment) of the session.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Start/abandon control for the ingestion task.
#[derive(Debug)]
pub struct IngestionLifecycle {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
    status: IngestionStatus,
}

impl IngestionLifecycle {
    /// A controller with no session started.
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            handle: None,
            status: IngestionStatus::default(),
        }
    }

    /// Spawns `session` on the current tokio runtime.
    ///
    /// The closure receives the token that `shutdown` cancels. Must be called
    /// from within a runtime.
    pub fn start<F, Fut>(&mut self, session: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(LifecycleError::AlreadyStarted);
        }

        let fut = session(self.shutdown.child_token());
        let running = Arc::clone(&self.status.running);
        running.store(true, Ordering::Release);
        self.handle = Some(tokio::spawn(async move {
            fut.await;
            running.store(false, Ordering::Release);
        }));
        log::info!("Ingestion loop started.");
        Ok(())
    }

    /// `true` while the spawned session has not finished.
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// A handle the request layer can poll for the health endpoint.
    pub fn status(&self) -> IngestionStatus {
        self.status.clone()
    }

    /// A token that is cancelled when `shutdown` runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels and abandons the session. Does not wait for it.
    pub fn shutdown(mut self) {
        self.shutdown.cancel();
        self.status.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
                log::info!("Ingestion loop abandoned at shutdown.");
            }
        }
    }
}

impl Default for IngestionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
