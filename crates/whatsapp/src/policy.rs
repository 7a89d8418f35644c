use std::time::Duration;

/// Outcome of consulting the reconnect policy after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { delay: Duration },
    Stop,
}

/// Bounded, linearly growing retry schedule.
///
/// The total number of automatic retries is capped by `ceiling`; the wait
/// itself is not capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub ceiling: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, ceiling: u32) -> Self {
        Self {
            base_delay,
            ceiling,
        }
    }

    pub fn from_config(cfg: &wagate_config::LifecycleConfig) -> Self {
        Self::new(cfg.reconnect_base_delay(), cfg.max_reconnect_attempts)
    }

    /// Decide what to do given the number of retries already made.
    pub fn decide(&self, attempts: u32) -> ReconnectDecision {
        if attempts < self.ceiling {
            ReconnectDecision::Retry {
                delay: self.base_delay.saturating_mul(attempts.saturating_add(1)),
            }
        } else {
            ReconnectDecision::Stop
        }
    }
}
