//! Circuit breakers around outbound platform calls.
//!
//! Every REST-style platform operation runs behind a named breaker with a
//! call timeout and a rolling error window. An open breaker fails fast;
//! the delivery worker treats that as a retryable failure and lets the
//! queue's backoff carry the job forward.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::platform::PlatformError;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Ceiling for a single platform call.
    pub call_timeout: Duration,
    /// Rolling window over which the error rate is computed.
    pub window: Duration,
    /// Minimum calls in the window before the breaker may open.
    pub min_calls: u32,
    /// Error rate at which the breaker opens.
    pub failure_rate: f64,
    /// How long an open breaker waits before allowing a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            call_timeout: Duration::from_secs(15),
            window: Duration::from_secs(60),
            min_calls: 10,
            failure_rate: 0.5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

struct Inner {
    state: State,
    /// (when, failed) per recorded call, pruned to the rolling window.
    calls: VecDeque<(Instant, bool)>,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open")]
    Open,
    #[error("call timed out")]
    Timeout,
    #[error("{0}")]
    Inner(E),
}

pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Self {
        CircuitBreaker {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: State::Closed,
                calls: VecDeque::new(),
            }),
        }
    }

    /// Run `fut` under the breaker's timeout.
    ///
    /// `count_failure` decides whether an inner error feeds the error
    /// window: platform rate limits and permanent refusals say nothing
    /// about platform health and are recorded as successes. Timeouts
    /// always count.
    pub async fn call<T, E, Fut>(
        &self,
        fut: Fut,
        count_failure: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.acquire() {
            return Err(BreakerError::Open);
        }
        match tokio::time::timeout(self.cfg.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record(false);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(count_failure(&e));
                Err(BreakerError::Inner(e))
            }
            Err(_elapsed) => {
                self.record(true);
                Err(BreakerError::Timeout)
            }
        }
    }

    /// Whether a call may proceed right now; transitions Open -> HalfOpen
    /// once the reset timeout has elapsed.
    fn acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open { since } => {
                if since.elapsed() >= self.cfg.reset_timeout {
                    info!(breaker = %self.name, "circuit half-open, probing");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record(&self, failed: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if inner.state == State::HalfOpen {
            // The probe result decides alone; the old window is stale.
            inner.calls.clear();
            if failed {
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
                inner.state = State::Open { since: now };
            } else {
                info!(breaker = %self.name, "probe succeeded, circuit closed");
                inner.state = State::Closed;
            }
            return;
        }

        inner.calls.push_back((now, failed));
        if let Some(cutoff) = now.checked_sub(self.cfg.window) {
            while inner.calls.front().is_some_and(|(at, _)| *at < cutoff) {
                inner.calls.pop_front();
            }
        }

        let total = inner.calls.len() as u32;
        let failures = inner.calls.iter().filter(|(_, f)| *f).count();
        if total >= self.cfg.min_calls
            && failures as f64 / f64::from(total) >= self.cfg.failure_rate
        {
            warn!(
                breaker = %self.name,
                failures,
                total,
                "error rate over threshold, circuit opened"
            );
            inner.state = State::Open { since: now };
            inner.calls.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lazily-created named breakers, shared by all workers.
pub struct BreakerRegistry {
    cfg: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(cfg: BreakerConfig) -> Self {
        BreakerRegistry {
            cfg,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.cfg.clone())))
            .clone()
    }

    /// Run one platform call behind its named breaker and classify the
    /// failure for the delivery worker.
    pub async fn guarded<T, Fut>(&self, name: &str, fut: Fut) -> Result<T, CallFailure>
    where
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let breaker = self.get(name);
        let counted = |e: &PlatformError| matches!(e, PlatformError::Transient(_));
        match breaker.call(fut, counted).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open) => {
                Err(CallFailure::Retryable(format!("circuit {} open", name)))
            }
            Err(BreakerError::Timeout) => {
                Err(CallFailure::Retryable(format!("{} timed out", name)))
            }
            Err(BreakerError::Inner(PlatformError::Transient(msg))) => {
                Err(CallFailure::Retryable(msg))
            }
            Err(BreakerError::Inner(PlatformError::RateLimited { retry_after_ms })) => {
                Err(CallFailure::RateLimited { retry_after_ms })
            }
            Err(BreakerError::Inner(PlatformError::Permanent(msg))) => {
                Err(CallFailure::Permanent(msg))
            }
            Err(BreakerError::Inner(PlatformError::Unsupported)) => Err(CallFailure::Unsupported),
        }
    }
}

/// Outcome classes the delivery worker acts on.
#[derive(Debug)]
pub enum CallFailure {
    /// Transient, timed out, or circuit open: fail the job, queue retries.
    Retryable(String),
    /// Platform-side 429: reschedule, not a failure.
    RateLimited { retry_after_ms: u64 },
    /// Permanent refusal: clean up mapping state and complete the job.
    Permanent(String),
    /// The platform cannot perform this operation at all.
    Unsupported,
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallFailure::Retryable(msg) => write!(f, "retryable: {}", msg),
            CallFailure::RateLimited { retry_after_ms } => {
                write!(f, "rate limited for {} ms", retry_after_ms)
            }
            CallFailure::Permanent(msg) => write!(f, "permanent: {}", msg),
            CallFailure::Unsupported => write!(f, "unsupported"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
