//! Poll interval schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the interval grows between probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same interval between every probe
    Fixed,
    /// Doubling: initial * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear: initial * attempt
    Linear,
}

/// Interval schedule between status probes.
///
/// The default is 3s, 6s, then 12s for every later probe. The schedule is a
/// pure function of the probe count: failed probes advance it like successful
/// ones and nothing resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBackoff {
    /// Interval after the first probe
    pub initial: Duration,
    /// Cap reached by the growing strategies
    pub max: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(3), Duration::from_secs(12))
    }
}

impl PollBackoff {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn linear(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Delay to wait after probe number `attempt` (1-indexed) before the next.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.initial,
            BackoffStrategy::Exponential => {
                // 2^31 already overflows any sane cap
                let factor = 1u32 << (attempt - 1).min(31);
                self.initial.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.initial.saturating_mul(attempt),
        };

        delay.min(self.max.max(self.initial))
    }
}
