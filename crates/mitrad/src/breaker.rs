//! Circuit breaker guarding calls to an unhealthy upstream dependency.
//!
//! Tracks call outcomes over a trailing time window and opens once the
//! failure fraction crosses the configured threshold. An open breaker
//! rejects calls without touching upstream until the reset interval has
//! elapsed; then exactly one probing call is let through. Scoped per
//! dependency and per process instance; wrap in `shared()` when concurrent
//! requests reuse one breaker.

use mitra_common::MitraError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through; outcomes are recorded
    Closed,
    /// Calls are rejected without reaching upstream
    Open,
    /// One probing call is in flight; everything else is rejected
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
    at: Instant,
    failed: bool,
}

/// Failure-rate gated circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current state
    state: CircuitState,
    /// Call outcomes inside the trailing window, oldest first
    outcomes: VecDeque<CallOutcome>,
    /// Time when the circuit last opened
    opened_at: Option<Instant>,
    /// When the outstanding half-open probe was granted
    probe_started: Option<Instant>,
    /// Trailing window over which the failure rate is computed
    window: Duration,
    /// Failure fraction at or above which the circuit opens
    failure_rate_threshold: f64,
    /// Minimum calls in the window before the rate is evaluated
    min_calls: usize,
    /// Time an open circuit waits before allowing a probe
    reset_interval: Duration,
}

/// Breaker handle shared across concurrent orchestrator invocations.
pub type SharedCircuitBreaker = Arc<Mutex<CircuitBreaker>>;

impl CircuitBreaker {
    pub fn new(
        window: Duration,
        failure_rate_threshold: f64,
        min_calls: usize,
        reset_interval: Duration,
    ) -> Self {
        Self {
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            probe_started: None,
            window,
            failure_rate_threshold,
            min_calls,
            reset_interval,
        }
    }

    pub fn shared(self) -> SharedCircuitBreaker {
        Arc::new(Mutex::new(self))
    }

    /// Ask permission to call upstream.
    ///
    /// `Ok(())` means the caller may proceed and must report the outcome via
    /// `record_success` / `record_failure`. When an open circuit's reset
    /// interval has elapsed, the first caller through here becomes the probe
    /// and the state moves to half-open; later callers are rejected until
    /// that probe's outcome is recorded. A probe whose outcome is never
    /// reported (caller cancelled mid-flight) re-arms after another reset
    /// interval so the circuit cannot wedge half-open.
    pub fn check(&mut self) -> Result<(), MitraError> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.reset_interval {
                    self.state = CircuitState::HalfOpen;
                    self.probe_started = Some(Instant::now());
                    Ok(())
                } else {
                    Err(MitraError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                let stale = self
                    .probe_started
                    .map(|at| at.elapsed() >= self.reset_interval)
                    .unwrap_or(true);
                if stale {
                    self.probe_started = Some(Instant::now());
                    Ok(())
                } else {
                    Err(MitraError::CircuitOpen)
                }
            }
        }
    }

    /// Record a successful upstream call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.push_outcome(false);
            }
            CircuitState::HalfOpen => {
                // Probe succeeded, service recovered
                self.close();
            }
            CircuitState::Open => {
                // Calls are rejected while open; nothing to record
            }
        }
    }

    /// Record a failed upstream call. Timeouts count the same as errors.
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.push_outcome(true);
                if self.failure_rate_exceeded() {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed, back to open with a fresh reset clock
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn push_outcome(&mut self, failed: bool) {
        self.outcomes.push_back(CallOutcome {
            at: Instant::now(),
            failed,
        });
        self.evict_expired();
    }

    /// Drop outcomes older than the trailing window.
    fn evict_expired(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.outcomes.front() {
            if now.duration_since(front.at) > self.window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate_exceeded(&self) -> bool {
        let total = self.outcomes.len();
        if total < self.min_calls {
            return false;
        }
        let failures = self.outcomes.iter().filter(|o| o.failed).count();
        failures as f64 / total as f64 >= self.failure_rate_threshold
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_started = None;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.outcomes.clear();
        self.opened_at = None;
        self.probe_started = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 0.5, 2, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            Duration::from_secs(60),
            0.5,
            2,
            Duration::from_millis(reset_ms),
        )
    }

    #[test]
    fn test_breaker_opens_at_failure_rate() {
        let mut cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed); // below min sample

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open); // 2/2 failed
        assert!(cb.opened_at.is_some());
    }

    #[test]
    fn test_breaker_stays_closed_below_threshold() {
        let mut cb = CircuitBreaker::default();

        cb.record_success();
        cb.record_success();
        cb.record_success();
        cb.record_failure();
        // 1 failure / 4 calls = 0.25 < 0.5
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        cb.record_failure();
        // 3 / 6 = 0.5, at threshold
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_without_calling_upstream() {
        let mut cb = fast_breaker(10_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.check().is_err());
        assert!(cb.check().is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_after_reset_interval() {
        let mut cb = fast_breaker(10);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        // First check after the interval is the probe
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_allows_exactly_one_probe() {
        let mut cb = fast_breaker(10);
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.check().is_ok());
        // Probe outstanding: everyone else is rejected
        assert!(cb.check().is_err());
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_probe_success_closes_and_clears_history() {
        let mut cb = fast_breaker(10);
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        cb.check().unwrap();

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.outcomes.is_empty());
        assert!(cb.opened_at.is_none());

        // Old failures are gone; one new failure is below the min sample
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_probe_failure_reopens_with_fresh_clock() {
        let mut cb = fast_breaker(30);
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(35));
        cb.check().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Fresh opened_at: still rejecting right away
        assert!(cb.check().is_err());

        std::thread::sleep(Duration::from_millis(35));
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_abandoned_probe_rearms_after_interval() {
        let mut cb = fast_breaker(10);
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));

        // Probe granted but its outcome never gets reported
        assert!(cb.check().is_ok());
        assert!(cb.check().is_err());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_window_eviction_drops_stale_outcomes() {
        let mut cb = CircuitBreaker::new(
            Duration::from_millis(20),
            0.5,
            3,
            Duration::from_secs(30),
        );

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed); // 2 < min_calls of 3

        std::thread::sleep(Duration::from_millis(30));
        cb.record_failure();

        // The two stale failures aged out; only the fresh one remains
        assert_eq!(cb.outcomes.len(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_successes_count_toward_sample_size() {
        let mut cb = CircuitBreaker::default();

        cb.record_success();
        cb.record_failure();
        // 1/2 = 0.5 meets the threshold with the min sample met
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
