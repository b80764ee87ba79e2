use std::time::Duration;

/// Pause schedule after the enrichment service signals a rate limit.
///
/// A server hint wins; otherwise the delay doubles with every consecutive
/// backoff of the batch, capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffSchedule {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffSchedule {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// Delay for the `consecutive`-th backoff in a row (1-based).
    pub fn delay_for(&self, consecutive: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay).max(Duration::from_secs(1));
        }
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let exponent = consecutive.saturating_sub(1).min(10);
        let factor = 1u128 << exponent;
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let schedule = BackoffSchedule::new(Duration::from_secs(30), Duration::from_secs(100));
        assert_eq!(schedule.delay_for(1, None), Duration::from_secs(30));
        assert_eq!(schedule.delay_for(2, None), Duration::from_secs(60));
        assert_eq!(schedule.delay_for(3, None), Duration::from_secs(100));
    }

    #[test]
    fn server_hint_wins_but_is_capped() {
        let schedule = BackoffSchedule::new(Duration::from_secs(30), Duration::from_secs(100));
        assert_eq!(
            schedule.delay_for(5, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            schedule.delay_for(1, Some(Duration::from_secs(600))),
            Duration::from_secs(100)
        );
    }
}
