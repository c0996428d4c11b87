use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::{BreakerConfig, OpenPolicy},
    error::BreakerError,
    state::CircuitState,
};

pub type Fallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

// Timestamps are clock readings in nanos, shifted by one so that 0 means "never".
const UNSET: u64 = 0;

/// Circuit breaker guarding a fallible operation.
///
/// Every field is its own atomic cell and no lock is held while the wrapped action
/// runs, so concurrent calls interleave freely. Counts are therefore best effort
/// under contention.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    fallback: Option<Fallback>,
    clock: Arc<dyn Clock>,

    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    auto_close_count: AtomicU32,
    last_attempt: AtomicU64,
    open_start_time: AtomicU64,
    auto_close_start_time: AtomicU64,
}

// Point-in-time view of the breaker, read field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub auto_close_count: u32,
    pub auto_close_started: bool,
}

enum Admission {
    Proceed { idle: Duration },
    Reject { retry_after: Duration },
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            name: "breaker".to_string(),
            config,
            fallback: None,
            clock: Arc::new(SystemClock::new()),
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            auto_close_count: AtomicU32::new(0),
            last_attempt: AtomicU64::new(UNSET),
            open_start_time: AtomicU64::new(UNSET),
            auto_close_start_time: AtomicU64::new(UNSET),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // Runs after every failed action. An error here replaces the action's error.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            auto_close_count: self.auto_close_count.load(Ordering::SeqCst),
            auto_close_started: self.auto_close_start_time.load(Ordering::SeqCst) != UNSET,
        }
    }

    /// Forces the circuit closed and zeroes every counter.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.auto_close_count.store(0, Ordering::SeqCst);
        let previous = self
            .state
            .swap(CircuitState::Closed.as_u8(), Ordering::SeqCst);
        self.auto_close_start_time.store(UNSET, Ordering::SeqCst);

        if previous != CircuitState::Closed.as_u8() {
            debug!(
                breaker = %self.name,
                from = %CircuitState::from_u8(previous),
                "circuit closed"
            );
        }
    }

    /// Runs `action` under the breaker.
    ///
    /// Returns the action's error on failure, or the fallback's error if a
    /// configured fallback fails as well. With [`OpenPolicy::Reject`] an open
    /// circuit answers without running the action.
    pub fn execute<E, F>(&self, action: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let idle = match self.admit() {
            Admission::Proceed { idle } => idle,
            Admission::Reject { retry_after } => return self.reject(retry_after),
        };

        let outcome = action();
        self.record(outcome, idle)
    }

    // Same as `execute` for actions that return a future. Nothing is held across
    // the await.
    pub async fn execute_async<E, F, Fut>(&self, action: F) -> Result<(), BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let idle = match self.admit() {
            Admission::Proceed { idle } => idle,
            Admission::Reject { retry_after } => return self.reject(retry_after),
        };

        let outcome = action().await;
        self.record(outcome, idle)
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now();
        let idle = self.since(&self.last_attempt, now);

        // Closed but idle too long: revalidate with a probe.
        if self.state() == CircuitState::Closed && idle > self.config.reset_timeout {
            self.transition(CircuitState::Closed, CircuitState::HalfOpen);
        }

        if self.state() == CircuitState::Open {
            let open_for = self.since(&self.open_start_time, now);
            if open_for > self.config.open_duration {
                self.transition(CircuitState::Open, CircuitState::HalfOpen);
            } else if self.config.open_policy == OpenPolicy::Reject {
                return Admission::Reject {
                    retry_after: self.config.open_duration.saturating_sub(open_for),
                };
            }
        }

        Admission::Proceed { idle }
    }

    fn reject<E>(&self, retry_after: Duration) -> Result<(), BreakerError<E>> {
        debug!(breaker = %self.name, ?retry_after, "call rejected, circuit open");
        match &self.fallback {
            Some(fallback) => fallback().map_err(BreakerError::Fallback),
            None => Err(BreakerError::Rejected { retry_after }),
        }
    }

    fn record<E>(&self, outcome: Result<(), E>, idle: Duration) -> Result<(), BreakerError<E>> {
        match outcome {
            Ok(()) => {
                self.on_success(idle);
                Ok(())
            }
            Err(err) => self.on_failure(err),
        }
    }

    fn on_success(&self, idle: Duration) {
        let successes = increment(&self.success_count);
        let streak = self.auto_close_count.load(Ordering::SeqCst);

        if successes >= self.config.success_threshold
            && (streak >= self.config.auto_close_threshold
                || idle > self.config.auto_close_duration)
        {
            self.reset();
        }
    }

    fn on_failure<E>(&self, err: E) -> Result<(), BreakerError<E>> {
        let failures = increment(&self.failure_count);

        if failures >= self.config.failure_threshold {
            let now = self.stamp();
            let previous = self.state.swap(CircuitState::Open.as_u8(), Ordering::SeqCst);
            self.open_start_time.store(now, Ordering::SeqCst);
            self.last_attempt.store(now, Ordering::SeqCst);

            if previous != CircuitState::Open.as_u8() {
                warn!(breaker = %self.name, failures, "circuit opened");
            }
        } else {
            // a failure breaks any auto-close streak
            self.auto_close_count.store(0, Ordering::SeqCst);
        }

        if let Some(fallback) = &self.fallback {
            debug!(breaker = %self.name, "running fallback");
            fallback().map_err(BreakerError::Fallback)?;
        }

        if self.state() == CircuitState::Closed {
            self.auto_close_start_time
                .store(self.stamp(), Ordering::SeqCst);
        }

        Err(BreakerError::Action(err))
    }

    fn transition(&self, from: CircuitState, to: CircuitState) {
        let moved = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            debug!(breaker = %self.name, %from, %to, "circuit state changed");
        }
    }

    fn stamp(&self) -> u64 {
        to_nanos(self.clock.now()).saturating_add(1)
    }

    // Time since the stamp in `cell`. A stamp that was never set is infinitely old.
    fn since(&self, cell: &AtomicU64, now: Duration) -> Duration {
        match cell.load(Ordering::SeqCst) {
            UNSET => Duration::MAX,
            stamp => {
                let now = to_nanos(now).saturating_add(1);
                Duration::from_nanos(now.saturating_sub(stamp))
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("has_fallback", &self.fallback.is_some())
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

fn increment(counter: &AtomicU32) -> u32 {
    let previous = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_add(1))
        })
        .unwrap_or(u32::MAX);
    previous.saturating_add(1)
}

fn to_nanos(at: Duration) -> u64 {
    u64::try_from(at.as_nanos()).unwrap_or(u64::MAX)
}
