//! Per-provider circuit breaker.
//!
//! Three-state machine: `closed -> open -> half_open -> closed`. All calls
//! pass while closed; while open they fail fast without contacting the
//! provider. After the cool-down the first call probes in half-open:
//! success closes the breaker, failure reopens it with a longer cool-down
//! (exponential, capped).

use schemars::JsonSchema;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_until: Option<Instant>,
    /// Cool-down applied at the next open; doubles per reopen.
    next_cooldown: Duration,
    last_error: Option<String>,
}

/// Read-only view for health reporting.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Seconds until the breaker half-opens, when open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_for_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Mutex-guarded breaker; every touch of the state is a short critical
/// section, never held across I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    base_cooldown: Duration,
    cooldown_cap: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, base_cooldown: Duration, cooldown_cap: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_until: None,
                next_cooldown: base_cooldown,
                last_error: None,
            }),
            failure_threshold,
            base_cooldown,
            cooldown_cap,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call may proceed. While open and before `opened_until`,
    /// returns the remaining cool-down; at `opened_until` the breaker
    /// moves to half-open and admits one probe.
    pub fn check(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let until = inner.opened_until.unwrap_or_else(Instant::now);
                let now = Instant::now();
                if now >= until {
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
        }
    }

    /// Records a successful call: closes the breaker and resets back-off.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_until = None;
        inner.next_cooldown = self.base_cooldown;
        inner.last_error = None;
    }

    /// Records an `unavailable`-class failure. Opens the breaker when the
    /// consecutive-failure threshold is crossed, or immediately when the
    /// half-open probe fails.
    pub fn record_failure(&self, error: &str) {
        let mut inner = self.lock();
        inner.last_error = Some(error.to_string());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold;
        if should_open {
            let cooldown = inner.next_cooldown;
            inner.state = BreakerState::Open;
            inner.opened_until = Some(Instant::now() + cooldown);
            inner.next_cooldown = (cooldown * 2).min(self.cooldown_cap);
        }
    }

    /// Opens the breaker for at least `duration` (rate-limit trip). Does
    /// not escalate the back-off: the vendor told us exactly how long.
    pub fn trip_for(&self, duration: Duration, error: &str) {
        let mut inner = self.lock();
        inner.last_error = Some(error.to_string());
        inner.state = BreakerState::Open;
        let until = Instant::now() + duration;
        // Keep the later deadline if already open longer.
        if inner.opened_until.is_none_or(|u| u < until) {
            inner.opened_until = Some(until);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let open_for_secs = match inner.state {
            BreakerState::Open => inner
                .opened_until
                .map(|u| u.saturating_duration_since(Instant::now()).as_secs()),
            _ => None,
        };
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            open_for_secs,
            last_error: inner.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_millis(50), Duration::from_secs(1))
    }

    #[test]
    fn test_closed_admits_calls() {
        let b = breaker();
        assert!(b.check().is_ok());
        assert_eq!(b.snapshot().state, BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker();
        b.record_failure("503");
        b.record_failure("503");
        assert!(b.check().is_ok(), "below threshold stays closed");
        b.record_failure("503");
        assert!(b.check().is_err(), "third consecutive failure opens");
        assert_eq!(b.snapshot().state, BreakerState::Open);
    }

    #[test]
    fn test_half_open_probe_then_close() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure("503");
        }
        assert!(b.check().is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(b.check().is_ok(), "cool-down elapsed admits a probe");
        assert_eq!(b.snapshot().state, BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.snapshot().state, BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens_longer() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure("503");
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(b.check().is_ok());

        b.record_failure("still down");
        let snap = b.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        // Second open uses the doubled cool-down (100ms), so the probe
        // window has not elapsed yet.
        assert!(b.check().is_err());
    }

    #[test]
    fn test_trip_for_respects_vendor_hint() {
        let b = breaker();
        b.trip_for(Duration::from_millis(80), "429");
        assert!(b.check().is_err());
        std::thread::sleep(Duration::from_millis(90));
        assert!(b.check().is_ok());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let b = breaker();
        b.record_failure("503");
        b.record_failure("503");
        b.record_success();
        b.record_failure("503");
        b.record_failure("503");
        assert!(b.check().is_ok(), "count restarted after success");
    }
}
