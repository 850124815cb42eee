//! Retry policies, failure actions, and circuit breakers for node execution
//!
//! A node's [`NodePolicy`] decides what the executor does when the node
//! raises: retry with exponential backoff (optionally only for certain error
//! kinds), then fall back / skip / ignore / abort per the configured
//! [`FailureAction`]. An optional [`CircuitBreaker`] trips after N
//! consecutive failures and half-opens after a cooldown.

use crate::error::GraphError;
use crate::graph::NodeOutput;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exponential-backoff retry configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries)
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt
    pub multiplier: f64,
    /// Randomize each delay by a 0.5x–1.5x factor
    pub jitter: bool,
    /// Error kinds (see [`GraphError::kind`]) that are retriable.
    /// `None` retries every kind.
    pub retriable_kinds: Option<HashSet<&'static str>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retriable_kinds: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restrict retries to the given error kinds
    pub fn retry_only<I: IntoIterator<Item = &'static str>>(mut self, kinds: I) -> Self {
        self.retriable_kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Whether another attempt is allowed after `attempt` failures of `error`
    pub fn should_retry(&self, attempt: usize, error: &GraphError) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        match &self.retriable_kinds {
            Some(kinds) => kinds.contains(error.kind()),
            None => true,
        }
    }

    /// Backoff delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay.max(0.0))
    }
}

/// Handler invoked when retries are exhausted and the action is `Fallback`
pub type FallbackFn = Arc<dyn Fn(&Value, &GraphError) -> NodeOutput + Send + Sync>;

/// What to do once a node has exhausted its retries
#[derive(Clone, Default)]
pub enum FailureAction {
    /// Fail the wave (default)
    #[default]
    Abort,
    /// Drop the node's output and do not schedule its successors
    Skip,
    /// Treat the node as having returned an empty update; successors still run
    Ignore,
    /// Substitute the handler's output for the node's
    Fallback(FallbackFn),
}

impl std::fmt::Debug for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureAction::Abort => write!(f, "Abort"),
            FailureAction::Skip => write!(f, "Skip"),
            FailureAction::Ignore => write!(f, "Ignore"),
            FailureAction::Fallback(_) => write!(f, "Fallback(<function>)"),
        }
    }
}

/// Per-node error handling: retry configuration plus terminal action
#[derive(Debug, Clone, Default)]
pub struct NodePolicy {
    pub retry: Option<RetryPolicy>,
    pub on_failure: FailureAction,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl NodePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn on_failure(mut self, action: FailureAction) -> Self {
        self.on_failure = action;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Trips open after N consecutive failures; half-opens after a cooldown,
/// letting one probe attempt through.
pub struct CircuitBreaker {
    failure_threshold: usize,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether an attempt may proceed right now
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.inner.lock().state, BreakerState::Closed | BreakerState::HalfOpen)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_respects_max() {
        let policy = RetryPolicy::new(2).with_jitter(false);
        let error = GraphError::Execution("boom".to_string());

        assert!(policy.should_retry(1, &error));
        assert!(policy.should_retry(2, &error));
        assert!(!policy.should_retry(3, &error));
    }

    #[test]
    fn test_retriable_kinds_filter() {
        let policy = RetryPolicy::new(5).retry_only(["timeout", "llm"]);

        assert!(policy.should_retry(1, &GraphError::Timeout(Duration::from_secs(1))));
        assert!(!policy.should_retry(1, &GraphError::Validation("bad".to_string())));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4))
            .with_jitter(false);

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(1)
            .with_initial_delay(Duration::from_secs(2))
            .with_jitter(true);

        for _ in 0..50 {
            let delay = policy.delay_for(1).as_secs_f64();
            assert!((1.0..3.0).contains(&delay), "delay {} out of band", delay);
        }
    }

    #[test]
    fn test_circuit_breaker_trips_and_half_opens() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(10));

        assert!(breaker.allow());
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();

        assert!(breaker.is_open());
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(15));
        // Cooldown elapsed: one probe allowed
        assert!(breaker.allow());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(5));

        breaker.record_failure();
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }
}
