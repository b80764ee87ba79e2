use crate::{
    budget::InvocationBudget,
    controller::{BatchController, InvocationReport},
    error::EngineError,
};
use chrono::Utc;
use engine_config::settings::validated::InvocationConfig;
use model::batch::state::BatchState;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a `run_until_settled` loop ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledRun {
    pub invocations: u32,
    pub last: Option<InvocationReport>,
    /// The loop stopped because shutdown was requested.
    pub interrupted: bool,
}

/// Re-invokes the controller until the batch settles.
pub struct ContinuationScheduler {
    controller: Arc<BatchController>,
    config: InvocationConfig,
}

impl ContinuationScheduler {
    pub fn new(controller: Arc<BatchController>, config: InvocationConfig) -> Self {
        Self { controller, config }
    }

    pub fn controller(&self) -> &Arc<BatchController> {
        &self.controller
    }

    /// One user-triggered invocation.
    pub async fn continue_once(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<InvocationReport, EngineError> {
        self.controller
            .run_invocation(InvocationBudget::from_config(&self.config), shutdown)
            .await
    }

    /// Time-driven loop. Stops on a terminal state, on a user pause or on
    /// shutdown. A backoff waits until `backoff_until`; any other pause waits
    /// the continuation interval.
    pub async fn run_until_settled(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<SettledRun, EngineError> {
        let mut run = SettledRun {
            invocations: 0,
            last: None,
            interrupted: false,
        };

        loop {
            let wait = match self.continue_once(shutdown).await {
                Ok(report) => {
                    run.invocations += 1;
                    let wait = self.wait_after(&report);
                    let settled = matches!(
                        report.state,
                        BatchState::Completed | BatchState::Cancelled | BatchState::PausedByUser
                    );
                    info!(
                        batch_id = %report.batch_id,
                        state = %report.state,
                        processed = report.processed,
                        remaining = report.remaining,
                        "Invocation finished"
                    );
                    run.last = Some(report);
                    if settled {
                        return Ok(run);
                    }
                    wait
                }
                Err(err) if err.is_lock_held() => {
                    warn!(error = %err, "Another invocation is running, waiting");
                    self.config.continuation_interval
                }
                Err(err) => return Err(err),
            };

            if shutdown.is_cancelled() {
                run.interrupted = true;
                return Ok(run);
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, leaving the batch for a later continuation");
                    run.interrupted = true;
                    return Ok(run);
                }
                _ = time::sleep(wait) => {}
            }
        }
    }

    fn wait_after(&self, report: &InvocationReport) -> Duration {
        match (report.state, report.backoff_until) {
            (BatchState::PausedForBackoff, Some(until)) => (until - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => self.config.continuation_interval,
        }
    }
}
