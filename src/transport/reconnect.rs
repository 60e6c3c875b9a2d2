use rand::Rng;
use std::time::Duration;

/// How long the transport waits before the next connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay forever. Matches the web client's behaviour.
    Fixed { delay: Duration },

    /// Doubling delay capped at `max_delay`, optionally randomized to between
    /// half and all of the computed delay, giving up after `max_retries`.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_retries: Option<u32>,
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retrying after `failures` consecutive failures (1-based).
    /// `None` means stop reconnecting.
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Fixed { delay } => Some(*delay),
            ReconnectPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if let Some(max) = max_retries {
                    if failures > *max {
                        return None;
                    }
                }

                let exponent = failures.saturating_sub(1).min(31);
                let delay = initial_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(*max_delay)
                    .min(*max_delay);

                if *jitter && !delay.is_zero() {
                    let half = delay / 2;
                    let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
                    Some(half + Duration::from_millis(spread))
                } else {
                    Some(delay)
                }
            }
        }
    }
}
