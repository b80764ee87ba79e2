//! Interrupt handling for `start --watch`, `continue` and `watch`.
//!
//! An interrupt never aborts a row half-way. The running invocation sees the
//! cancelled token between rows, saves its cursor as `PausedForContinuation`
//! and returns, so the next `continue` or `watch` resumes at the first row
//! without a recorded outcome. The process then exits with 130.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Turns SIGINT and SIGTERM into a cancelled token for the batch controller.
#[derive(Clone)]
pub struct InterruptWatch {
    token: CancellationToken,
    interrupted: Arc<AtomicBool>,
}

impl InterruptWatch {
    /// Spawns the signal listener. Only the first signal is acted on.
    pub fn install() -> Self {
        let watch = Self {
            token: CancellationToken::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        };
        let token = watch.token.clone();
        let interrupted = watch.interrupted.clone();

        tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigint() => "SIGINT",
                _ = sigterm() => "SIGTERM",
                _ = token.cancelled() => return,
            };
            info!(signal = name, "Interrupted, the batch stops after the current row");
            interrupted.store(true, Ordering::SeqCst);
            token.cancel();
        });
        watch
    }

    /// Token handed to `run_invocation` and the continuation scheduler.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

async fn sigint() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn sigterm() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

/// Process exit status of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    /// The command failed. The message has already been logged.
    Failed = 1,
    /// The command was interrupted and the batch left resumable.
    Interrupted = 130,
}

impl ExitCode {
    /// An interrupt wins over success because the batch may still have rows
    /// left. Errors win over both.
    pub fn of<T, E>(result: &Result<T, E>, interrupted: bool) -> Self {
        match result {
            Err(_) => ExitCode::Failed,
            Ok(_) if interrupted => ExitCode::Interrupted,
            Ok(_) => ExitCode::Success,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
