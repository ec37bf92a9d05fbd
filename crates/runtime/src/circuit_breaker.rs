// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-downstream-peer circuit breaker.
//!
//! State machine over `{Closed, Open, HalfOpen}`:
//! - **Closed** passes requests through and counts failures over a sliding
//!   window approximation (counters reset after `2 × minimum_request_count`
//!   requests).
//! - **Open** fails fast; after `open_state_seconds` the next request moves
//!   the breaker to half-open.
//! - **HalfOpen** admits at most `half_open_request_threshold` probes in
//!   flight; one failed probe re-opens, the threshold of successful probes
//!   closes.

use fbc_config::pipeline::CircuitBreakerConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through.
    Closed,
    /// Requests fail fast.
    Open,
    /// A bounded number of probes is in flight.
    HalfOpen,
}

impl BreakerState {
    /// Numeric encoding for the state gauge (0 closed, 1 open, 2 half-open).
    pub fn as_gauge(&self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

/// Outcome of asking the breaker to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed; report the result with `on_success`/`on_failure`.
    Allowed,
    /// The breaker is open (or half-open saturated); fail fast.
    Rejected,
}

#[derive(Debug)]
enum State {
    Closed { requests: u64, failures: u64 },
    Open { opened_at: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    requests: u64,
    failures: u64,
    transitions: u64,
    open_elapsed: Duration,
}

/// The breaker. Transitions are serialized by an internal mutex; the value is
/// shared behind an `Arc` and swapped wholesale when thresholds change.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    open_state: Duration,
    inner: Mutex<(State, Counters)>,
}

impl CircuitBreaker {
    /// Builds a closed breaker with the given thresholds.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let open_state = config.open_state();
        Self {
            config,
            open_state,
            inner: Mutex::new((
                State::Closed {
                    requests: 0,
                    failures: 0,
                },
                Counters::default(),
            )),
        }
    }

    /// The thresholds this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        match &self.inner.lock().0 {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Cumulative (requests, failures, transitions, seconds spent open).
    pub fn counters(&self) -> (u64, u64, u64, f64) {
        let guard = self.inner.lock();
        let mut open_elapsed = guard.1.open_elapsed;
        if let State::Open { opened_at } = &guard.0 {
            open_elapsed += opened_at.elapsed();
        }
        (
            guard.1.requests,
            guard.1.failures,
            guard.1.transitions,
            open_elapsed.as_secs_f64(),
        )
    }

    /// Asks the breaker to admit one call.
    pub fn pre_call(&self) -> Decision {
        let mut guard = self.inner.lock();
        let (state, counters) = &mut *guard;
        counters.requests += 1;
        match state {
            State::Closed { .. } => Decision::Allowed,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.open_state {
                    counters.open_elapsed += opened_at.elapsed();
                    counters.transitions += 1;
                    *state = State::HalfOpen {
                        in_flight: 1,
                        successes: 0,
                    };
                    Decision::Allowed
                } else {
                    Decision::Rejected
                }
            }
            State::HalfOpen {
                in_flight,
                successes,
            } => {
                if *in_flight + *successes >= self.config.half_open_request_threshold {
                    Decision::Rejected
                } else {
                    *in_flight += 1;
                    Decision::Allowed
                }
            }
        }
    }

    /// Reports a successful call previously admitted by [`Self::pre_call`].
    pub fn on_success(&self) {
        let mut guard = self.inner.lock();
        let (state, counters) = &mut *guard;
        match state {
            State::Closed { requests, failures } => {
                *requests += 1;
                Self::maybe_reset_window(self.config.minimum_request_count, requests, failures);
            }
            State::HalfOpen {
                in_flight,
                successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.config.half_open_request_threshold {
                    counters.transitions += 1;
                    *state = State::Closed {
                        requests: 0,
                        failures: 0,
                    };
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Reports a failed call previously admitted by [`Self::pre_call`].
    pub fn on_failure(&self) {
        let mut guard = self.inner.lock();
        let (state, counters) = &mut *guard;
        counters.failures += 1;
        match state {
            State::Closed { requests, failures } => {
                *requests += 1;
                *failures += 1;
                let min = self.config.minimum_request_count;
                let tripped = *requests >= min
                    && *failures * 100 >= u64::from(self.config.error_threshold_pct) * *requests;
                if tripped {
                    counters.transitions += 1;
                    *state = State::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    Self::maybe_reset_window(min, requests, failures);
                }
            }
            State::HalfOpen { .. } => {
                counters.transitions += 1;
                *state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    fn maybe_reset_window(minimum_request_count: u64, requests: &mut u64, failures: &mut u64) {
        if *requests >= 2 * minimum_request_count {
            *requests = 0;
            *failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        error_threshold_pct: u32,
        minimum_request_count: u64,
        open_state_seconds: u64,
        half_open_request_threshold: u32,
    ) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_pct,
            minimum_request_count,
            open_state_seconds,
            half_open_request_threshold,
        }
    }

    #[test]
    fn no_trip_below_minimum_request_count() {
        let breaker = CircuitBreaker::new(config(50, 20, 30, 5));
        for _ in 0..19 {
            assert_eq!(breaker.pre_call(), Decision::Allowed);
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        // The 20th failure crosses the minimum and the ratio threshold.
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn below_error_ratio_stays_closed_across_windows() {
        let breaker = CircuitBreaker::new(config(50, 10, 30, 3));
        // 30% failures, well under the 50% threshold.
        for i in 0..60 {
            assert_eq!(breaker.pre_call(), Decision::Allowed);
            if i % 10 < 3 {
                breaker.on_failure();
            } else {
                breaker.on_success();
            }
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_rejects_until_open_state_elapses() {
        let breaker = CircuitBreaker::new(config(50, 1, 60, 1));
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.pre_call(), Decision::Rejected);
        assert_eq!(breaker.pre_call(), Decision::Rejected);
    }

    #[test]
    fn half_open_closes_after_probe_threshold() {
        let breaker = CircuitBreaker::new(config(50, 1, 0, 2));
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        // open_state is zero: next request probes.
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.on_success();
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(config(50, 1, 0, 3));
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_failure();
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_caps_probes_in_flight() {
        let breaker = CircuitBreaker::new(config(50, 1, 0, 2));
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        breaker.on_failure();
        // Two probes admitted, third rejected while both are in flight.
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        assert_eq!(breaker.pre_call(), Decision::Allowed);
        assert_eq!(breaker.pre_call(), Decision::Rejected);
    }

    #[test]
    fn window_resets_after_twice_minimum() {
        let breaker = CircuitBreaker::new(config(90, 5, 30, 2));
        // Nine failures out of ten requests would trip a fresh window, but
        // the reset at 2×minimum keeps long-lived low-rate failure mixes in
        // bounded memory.
        for _ in 0..10 {
            assert_eq!(breaker.pre_call(), Decision::Allowed);
            breaker.on_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        let (requests, ..) = breaker.counters();
        assert_eq!(requests, 10);
    }
}
