//! Bounded retry schedules for calls to external providers.

use std::time::Duration;

/// How often, and after what pause, a failed call is attempted again.
///
/// `max_attempts` counts every call including the first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Call once and give up.
    #[default]
    None,
    /// Same pause before every retry.
    Fixed {
        max_attempts: u32,
        interval: Duration,
    },
    /// The pause after failed attempt `n` (zero-based) is `step * (n + 1)`.
    Linear { max_attempts: u32, step: Duration },
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy::None
    }

    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            interval,
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        RetryPolicy::Linear { max_attempts, step }
    }

    /// Whether attempt number `attempt` (zero-based) may be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Pause after failed attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
            RetryPolicy::Linear { step, .. } => step.saturating_mul(attempt.saturating_add(1)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { max_attempts, .. } | RetryPolicy::Linear { max_attempts, .. } => {
                (*max_attempts).max(1)
            }
        }
    }
}
