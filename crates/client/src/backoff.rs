//! Reconnect delay state with exponential growth and jitter.
//!
//! A fixed reconnect delay synchronizes retry storms across clients, and an
//! unbounded one hammers a recovering server. The state below grows the
//! delay geometrically to a cap, adds random jitter of up to a configured
//! fraction of the current delay, and resets to the floor on a successful
//! connect.

use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffPolicy, millis};

/// Mutable backoff state for one connection loop.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    delay_ms: u64,
}

impl BackoffState {
    /// Create state starting at the policy floor.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            delay_ms: millis(policy.floor),
            policy,
        }
    }

    /// The current un-jittered delay.
    pub const fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// The wait before the next attempt: current delay plus jitter, capped.
    ///
    /// Also grows the delay for the attempt after this one.
    pub fn next_wait(&mut self) -> Duration {
        let cap_ms = millis(self.policy.cap);
        let jitter_ms = if self.policy.jitter > 0.0 {
            let range = (self.delay_ms as f64 * self.policy.jitter).floor() as u64;
            if range > 0 {
                rand::thread_rng().gen_range(0..=range)
            } else {
                0
            }
        } else {
            0
        };

        let wait = self.delay_ms.saturating_add(jitter_ms).min(cap_ms);
        self.delay_ms = ((self.delay_ms as f64 * self.policy.growth).floor() as u64).min(cap_ms);
        Duration::from_millis(wait)
    }

    /// Reset the delay to the floor after a successful connect.
    pub fn reset(&mut self) {
        self.delay_ms = millis(self.policy.floor);
    }
}
