use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Retryable;

/// Backoff configuration for retryable external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No waiting, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Exponential backoff with jitter for a 1-indexed attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * 2_f64.powi(attempt.saturating_sub(1) as i32)).min(max_ms);

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Per-source consecutive-failure counter. Once the threshold is crossed
/// within a run the source is skipped for the remainder of that run.
#[derive(Debug)]
struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    open: bool,
}

impl CircuitBreaker {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
            open: false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true when this failure opened the circuit.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if !self.open && self.consecutive_failures >= self.threshold {
            self.open = true;
            return true;
        }
        false
    }
}

/// Minimum spacing between calls to one source, applied to successful calls
/// too so even a healthy source is not hammered.
#[derive(Debug)]
struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    fn throttle(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

struct SourceGate {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
}

/// Result of a guarded call.
#[derive(Debug)]
pub enum CallOutcome<T, E> {
    Ok(T),
    /// All attempts failed; the last error is reported.
    Err(E),
    /// The source's circuit is open, the call was not made.
    Skipped,
}

/// Wraps every call to a source or enrichment collaborator with rate
/// limiting, bounded retries and a per-source circuit breaker. Timeouts are
/// enforced by the collaborators themselves (socket and HTTP deadlines) and
/// surface here as transient errors.
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker_threshold: u32,
    min_interval: Duration,
    gates: HashMap<String, SourceGate>,
    opened: Vec<String>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker_threshold: u32, min_interval: Duration) -> Self {
        Self {
            policy,
            breaker_threshold,
            min_interval,
            gates: HashMap::new(),
            opened: Vec::new(),
        }
    }

    /// Sources whose circuit opened during this run, in order of opening.
    pub fn opened_circuits(&self) -> &[String] {
        &self.opened
    }

    pub fn is_open(&self, source: &str) -> bool {
        self.gates.get(source).is_some_and(|g| g.breaker.open)
    }

    pub fn call<T, E>(&mut self, source: &str, mut op: impl FnMut() -> Result<T, E>) -> CallOutcome<T, E>
    where
        E: Retryable + std::fmt::Display,
    {
        let threshold = self.breaker_threshold;
        let min_interval = self.min_interval;
        let gate = self
            .gates
            .entry(source.to_string())
            .or_insert_with(|| SourceGate {
                breaker: CircuitBreaker::new(threshold),
                limiter: RateLimiter::new(min_interval),
            });

        if gate.breaker.open {
            debug!(source, "circuit open, skipping call");
            return CallOutcome::Skipped;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            gate.limiter.throttle();
            match op() {
                Ok(value) => {
                    gate.breaker.record_success();
                    return CallOutcome::Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(source, attempt, %err, ?delay, "transient failure, backing off");
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    if gate.breaker.record_failure() {
                        warn!(source, "consecutive failures crossed threshold, circuit opened");
                        self.opened.push(source.to_string());
                    }
                    return CallOutcome::Err(err);
                }
            }
        }
    }
}
