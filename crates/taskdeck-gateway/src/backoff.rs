//! Reconnection policy and state machine.
//!
//! Kept free of timers so the schedule can be checked by stepping the
//! machine instead of sleeping.

use std::time::Duration;

/// Exponential backoff with a hard attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Attempts allowed between two successful connections.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 10,
        }
    }
}

/// What to do after the connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached; the owner must treat this as fatal.
    GiveUp { attempts: u32 },
    /// The owner asked to disconnect.
    Suppressed,
}

/// Attempt counter driven by connection outcomes.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
    suppressed: bool,
}

impl ReconnectState {
    /// Create a fresh state machine.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            suppressed: false,
        }
    }

    /// Attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection was established.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// The connection dropped (or never came up); decide what happens next.
    pub fn next(&mut self) -> ReconnectDecision {
        if self.suppressed {
            return ReconnectDecision::Suppressed;
        }
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }

    /// Stop reconnecting: pins the counter at the ceiling.
    pub fn suppress(&mut self) {
        self.attempts = self.policy.max_attempts;
        self.suppressed = true;
    }

    /// Start over for an explicit `connect()`.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.suppressed = false;
    }
}
