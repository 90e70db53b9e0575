// src/utils/shutdown.rs
//! Lifecycle token passed down from the host process
//!
//! Components never install process-wide signal handlers themselves. The
//! host owns one `Lifecycle`, hands it to each component through
//! `attach_shutdown`, and cancels it once when the process should stop.
//! Each component registers a single watcher task and detaches it again when
//! it is shut down by other means.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared shutdown signal
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request shutdown of every attached component
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Lifecycle shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Underlying token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the lifecycle on Ctrl-C
    ///
    /// Only the host binary should call this.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received shutdown signal"),
                        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
                    }
                    lifecycle.shutdown();
                }
                _ = lifecycle.cancelled() => {}
            }
        })
    }

    /// Register a teardown callback that runs once when the lifecycle is cancelled
    pub fn register<F, Fut>(&self, name: impl Into<String>, teardown: F) -> ShutdownHook
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let detach = CancellationToken::new();
        let token = self.token.clone();
        let detach_wait = detach.clone();

        debug!("Registering shutdown hook for {}", name);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Running shutdown hook for {}", name);
                    teardown().await;
                }
                _ = detach_wait.cancelled() => {
                    debug!("Shutdown hook for {} detached", name);
                }
            }
        });

        ShutdownHook { detach, handle }
    }
}

/// Handle to a registered teardown callback
#[derive(Debug)]
pub struct ShutdownHook {
    detach: CancellationToken,
    handle: JoinHandle<()>,
}

impl ShutdownHook {
    /// Stop waiting for the lifecycle
    ///
    /// Safe to call from inside the teardown itself: the watcher has already
    /// chosen its branch and runs to completion.
    pub fn detach(&self) {
        self.detach.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
