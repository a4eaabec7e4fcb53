// =============================================================================
// circuit_breaker.rs - BACKING OFF FROM SOURCES THAT STOPPED ANSWERING
// =============================================================================
//
// Collection modules make one request per item (a paste, a host list). When a
// source starts failing we stop hammering it: after N consecutive failures the
// breaker opens and every remaining item of the current pass is deferred to
// the pending queue. Once the reset timeout has passed, requests go out again
// as probes. A success closes the breaker, a failed probe re-opens it.
//
// The runner's drain loop is what eventually retries the deferred items, so
// the breaker itself never sleeps or retries anything.
// =============================================================================

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    Probing,
}

/// Coarse view of a breaker for logs and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    Probing,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::Probing => "probing",
        })
    }
}

/// Per-module breaker, shared by clones.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    source: Arc<str>,
    gate: Arc<Mutex<Gate>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            source: Arc::from(source.into()),
            gate: Arc::new(Mutex::new(Gate::Closed {
                consecutive_failures: 0,
            })),
            threshold: failure_threshold.max(1),
            cooldown: reset_timeout,
        }
    }

    /// Whether the next request may go out. An open breaker whose cooldown
    /// has run out switches to probing.
    pub fn allow_request(&self) -> bool {
        let mut gate = self.gate.lock();
        match *gate {
            Gate::Closed { .. } | Gate::Probing => true,
            Gate::Open { since } if since.elapsed() >= self.cooldown => {
                info!(source = %self.source, "cooldown over, probing source");
                *gate = Gate::Probing;
                true
            }
            Gate::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut gate = self.gate.lock();
        if *gate == Gate::Probing {
            info!(source = %self.source, "source is answering again, breaker closed");
        }
        *gate = Gate::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut gate = self.gate.lock();
        *gate = match *gate {
            Gate::Closed {
                consecutive_failures,
            } if consecutive_failures + 1 >= self.threshold => {
                warn!(
                    source = %self.source,
                    failures = consecutive_failures + 1,
                    "breaker tripped, deferring remaining requests"
                );
                Gate::Open {
                    since: Instant::now(),
                }
            }
            Gate::Closed {
                consecutive_failures,
            } => Gate::Closed {
                consecutive_failures: consecutive_failures + 1,
            },
            Gate::Probing => {
                warn!(source = %self.source, "probe failed, breaker open again");
                Gate::Open {
                    since: Instant::now(),
                }
            }
            Gate::Open { .. } => Gate::Open {
                since: Instant::now(),
            },
        };
    }

    pub fn state(&self) -> BreakerState {
        match *self.gate.lock() {
            Gate::Closed { .. } => BreakerState::Closed,
            Gate::Open { .. } => BreakerState::Open,
            Gate::Probing => BreakerState::Probing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_breaker_lets_requests_through() {
        let breaker = CircuitBreaker::new("pastebin", 3, Duration::from_secs(5));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("pastebin", 3, Duration::from_secs(5));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_in_between_restarts_the_count() {
        let breaker = CircuitBreaker::new("knownbad", 3, Duration::from_secs(5));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_after_cooldown() {
        let breaker = CircuitBreaker::new("knownbad", 1, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), BreakerState::Probing);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(BreakerState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_clones_share_state() {
        let breaker = CircuitBreaker::new("pastebin", 1, Duration::from_secs(60));
        let clone = breaker.clone();
        clone.record_failure();
        assert!(!breaker.allow_request());
    }
}
