//! Reconnection policy and backoff schedule.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use humboldt_types::HumboldtError;

/// Default attempt limit for [`ReconnectPolicy::reconnect`].
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default base delay for [`ReconnectPolicy::reconnect`].
pub(crate) const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap for [`ReconnectPolicy::reconnect`].
pub(crate) const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// What to do after an unexpected disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Re-establish the session after the given delay.
    Retry(Duration),
    /// Stop trying and surface the error to the consumer.
    GiveUp,
}

/// Phases of the reconnection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ReconnectState {
    /// The session is healthy; no reconnection in progress.
    #[default]
    Idle,
    /// Backing off before the next attempt.
    AwaitingReconnect,
    /// An attempt is in flight.
    Reconnecting,
    /// The policy was exhausted; the failure is final.
    GaveUp,
}

/// Policy applied when the session drops without a user stop.
///
/// The built-in [`Reconnect`](Self::Reconnect) schedule only retries
/// errors that are transient at the transport level
/// ([`HumboldtError::is_retryable`]); authentication and protocol
/// failures give up immediately. A [`Custom`](Self::Custom) callback
/// sees every failure and decides for itself.
#[derive(Clone, Default)]
pub enum ReconnectPolicy {
    /// Surface the failure immediately.
    #[default]
    None,
    /// Retry with exponential backoff, then give up.
    Reconnect {
        /// Attempts before giving up.
        max_attempts: u32,
        /// Delay before the first retry; doubles per attempt.
        base_delay: Duration,
        /// Upper bound on the delay between attempts.
        max_delay: Duration,
    },
    /// Delegate the decision to user code, called with the failure and
    /// the 1-based attempt number.
    Custom(Arc<dyn Fn(&HumboldtError, u32) -> ReconnectDecision + Send + Sync>),
}

impl ReconnectPolicy {
    /// The built-in retry schedule with default limits.
    #[must_use]
    pub fn reconnect() -> Self {
        Self::Reconnect {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub(crate) fn decide(&self, error: &HumboldtError, attempt: u32) -> ReconnectDecision {
        match self {
            Self::None => ReconnectDecision::GiveUp,
            Self::Reconnect {
                max_attempts,
                base_delay,
                max_delay,
            } => {
                if !error.is_retryable() || attempt > *max_attempts {
                    ReconnectDecision::GiveUp
                } else {
                    ReconnectDecision::Retry(backoff_delay(attempt, *base_delay, *max_delay))
                }
            }
            Self::Custom(decide) => decide(error, attempt),
        }
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Reconnect {
                max_attempts,
                base_delay,
                max_delay,
            } => f
                .debug_struct("Reconnect")
                .field("max_attempts", max_attempts)
                .field("base_delay", base_delay)
                .field("max_delay", max_delay)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Calculates the backoff delay with exponential growth and jitter.
fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let exp_delay = (base_delay.as_millis() as u64).saturating_mul(1u64 << attempt.min(10));
    let capped_delay = exp_delay.min(max_delay.as_millis() as u64);

    // Deterministic jitter, up to 25% of the capped delay.
    let jitter_range = capped_delay / 4;
    let jitter = if jitter_range > 0 {
        let jitter_offset = (u64::from(attempt) * 17) % (jitter_range * 2);
        jitter_offset.saturating_sub(jitter_range)
    } else {
        0
    };

    // Never retry faster than 100ms.
    let final_delay = capped_delay.saturating_add(jitter).max(100);
    Duration::from_millis(final_delay)
}
