//! Retry schedule and the per-call attempt state machine.

use crate::error::{Result, SearchError};
use log::debug;
use std::time::Duration;

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SearchError::Config(
                "retry bound must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }
}

/// `base * 2^attempt`, saturating, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Waiting,
    Dispatching,
    Succeeded,
    Failed,
}

/// Tracks one logical request through its attempts. Pure bookkeeping: the
/// executor does the actual waiting and dispatching.
#[derive(Debug)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: AttemptState,
    attempt: u32,
    label: String,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy, label: impl Into<String>) -> Self {
        Self {
            policy,
            state: AttemptState::Idle,
            attempt: 0,
            label: label.into(),
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Zero-based index of the current attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn attempts_made(&self) -> u32 {
        match self.state {
            AttemptState::Idle => 0,
            _ => self.attempt + 1,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    fn transition(&mut self, next: AttemptState) {
        debug!(
            "{} attempt {}: {:?} -> {:?}",
            self.label,
            self.attempt + 1,
            self.state,
            next
        );
        self.state = next;
    }

    pub fn begin_wait(&mut self) {
        self.transition(AttemptState::Waiting);
    }

    pub fn begin_dispatch(&mut self) {
        self.transition(AttemptState::Dispatching);
    }

    pub fn succeed(&mut self) {
        self.transition(AttemptState::Succeeded);
    }

    /// Non-retryable outcome.
    pub fn fail(&mut self) {
        self.transition(AttemptState::Failed);
    }

    /// Transient outcome. Returns the backoff to observe before the next
    /// attempt, or `None` once the retry bound is exhausted.
    pub fn on_transient_failure(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts {
            self.transition(AttemptState::Failed);
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.transition(AttemptState::Waiting);
        self.attempt += 1;
        Some(delay)
    }
}
