use engine_config::settings::validated::InvocationConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Time box of one invocation.
///
/// Another row is started only while at least one row estimate of time is
/// left, so a row is never begun that is unlikely to finish.
#[derive(Debug, Clone, Copy)]
pub struct InvocationBudget {
    started: Instant,
    time_budget: Duration,
    row_estimate: Duration,
    max_rows: Option<usize>,
}

impl InvocationBudget {
    pub fn new(time_budget: Duration, row_estimate: Duration, max_rows: Option<usize>) -> Self {
        InvocationBudget {
            started: Instant::now(),
            time_budget,
            row_estimate,
            max_rows,
        }
    }

    pub fn from_config(config: &InvocationConfig) -> Self {
        Self::new(config.time_budget, config.row_estimate, config.max_rows)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.time_budget.saturating_sub(self.elapsed())
    }

    pub fn allows_another(&self, rows_done: usize) -> bool {
        if self.max_rows.is_some_and(|max| rows_done >= max) {
            return false;
        }
        self.remaining() >= self.row_estimate
    }
}
