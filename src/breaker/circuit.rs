//! Circuit Breaker Module
//!
//! Request-gating state machine with generation-tagged admissions.
//!
//! ```text
//! Closed   -> Open      ready_to_trip(counts) after a failure
//! Open     -> HalfOpen  timeout elapsed (checked lazily on next access)
//! HalfOpen -> Closed    consecutive_successes >= max_requests
//! HalfOpen -> Open      any failure
//! ```
//!
//! Every transition, and every elapsed closed-state interval, starts a new
//! generation with zeroed counts. A completion whose admission generation is
//! no longer current is discarded.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::breaker::config::DEFAULT_TIMEOUT;
use crate::breaker::{BreakerConfig, Counts, State, StateChangeHook, TripPredicate};
use crate::error::BreakerError;

// == Guarded State ==
#[derive(Debug)]
struct Machine {
    state: State,
    generation: u64,
    counts: Counts,
    /// End of the current closed interval or open timeout
    expiry: Option<Instant>,
}

type Transitions = Vec<(State, State)>;

// == Circuit Breaker ==
/// Gate in front of an unreliable dependency.
///
/// State, generation and counts sit behind one mutex that is held only for
/// bookkeeping; the wrapped operation always runs unlocked.
pub struct CircuitBreaker {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: TripPredicate,
    on_state_change: Option<StateChangeHook>,
    machine: Mutex<Machine>,
}

impl CircuitBreaker {
    // == Constructor ==
    pub fn new(config: BreakerConfig) -> Self {
        let threshold = config.failure_threshold;
        let ready_to_trip: TripPredicate = match config.ready_to_trip {
            Some(predicate) => predicate,
            None => Arc::new(move |counts: &Counts| counts.consecutive_failures >= threshold),
        };
        let timeout = if config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            config.timeout
        };

        let breaker = Self {
            name: config.name,
            max_requests: config.max_requests.max(1),
            interval: config.interval,
            timeout,
            ready_to_trip,
            on_state_change: config.on_state_change,
            machine: Mutex::new(Machine {
                state: State::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };
        breaker.start_generation(&mut breaker.machine.lock(), Instant::now());
        breaker
    }

    // == Execute ==
    /// Runs `operation` if the breaker admits it.
    ///
    /// Returns [`BreakerError::Open`] or [`BreakerError::TooManyRequests`]
    /// without invoking the operation when rejected. A panic inside the
    /// operation is recorded as a failure and then resumed. Dropping the
    /// returned future before it completes (a timeout, a losing `select!`
    /// branch) also records a failure, so an abandoned half-open probe
    /// frees its slot.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = Admission {
            breaker: self,
            generation: self.before_request()?,
            settled: false,
        };

        let outcome = AssertUnwindSafe(async move { operation().await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => {
                admission.settle(result.is_ok());
                result.map_err(BreakerError::Operation)
            }
            Err(panic) => {
                admission.settle(false);
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Cancellation-aware variant of [`execute`](Self::execute).
    ///
    /// The token is handed to the operation. If it is already cancelled the
    /// call is refused with [`BreakerError::Cancelled`] before admission.
    pub async fn execute_with_cancel<F, Fut, T, E>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if token.is_cancelled() {
            return Err(BreakerError::Cancelled);
        }
        let token = token.clone();
        self.execute(move || operation(token)).await
    }

    // == Introspection ==
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any pending time-based transition first.
    pub fn state(&self) -> State {
        self.observe(|machine| machine.state)
    }

    /// Counts for the current generation.
    pub fn counts(&self) -> Counts {
        self.observe(|machine| machine.counts)
    }

    pub fn generation(&self) -> u64 {
        self.observe(|machine| machine.generation)
    }

    fn observe<R>(&self, read: impl FnOnce(&Machine) -> R) -> R {
        let mut fired = Transitions::new();
        let value = {
            let mut machine = self.machine.lock();
            self.refresh(&mut machine, Instant::now(), &mut fired);
            read(&machine)
        };
        self.notify(fired);
        value
    }

    // == Admission ==
    /// Admits or rejects a request, returning the admission generation.
    pub(crate) fn before_request<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut fired = Transitions::new();
        let admission = {
            let mut machine = self.machine.lock();
            self.refresh(&mut machine, Instant::now(), &mut fired);

            match machine.state {
                State::Open => Err(BreakerError::Open),
                State::HalfOpen if machine.counts.requests >= self.max_requests => {
                    Err(BreakerError::TooManyRequests)
                }
                _ => {
                    machine.counts.on_request();
                    Ok(machine.generation)
                }
            }
        };
        self.notify(fired);
        admission
    }

    // == Completion ==
    /// Records an outcome unless `generation` has been superseded.
    pub(crate) fn after_request(&self, generation: u64, success: bool) {
        let mut fired = Transitions::new();
        {
            let mut machine = self.machine.lock();
            let now = Instant::now();
            self.refresh(&mut machine, now, &mut fired);

            if machine.generation == generation {
                if success {
                    self.on_success(&mut machine, now, &mut fired);
                } else {
                    self.on_failure(&mut machine, now, &mut fired);
                }
            }
        }
        self.notify(fired);
    }

    fn on_success(&self, machine: &mut Machine, now: Instant, fired: &mut Transitions) {
        machine.counts.on_success();
        if machine.state == State::HalfOpen
            && machine.counts.consecutive_successes >= self.max_requests
        {
            self.transition(machine, State::Closed, now, fired);
        }
    }

    fn on_failure(&self, machine: &mut Machine, now: Instant, fired: &mut Transitions) {
        match machine.state {
            State::Closed => {
                machine.counts.on_failure();
                if (self.ready_to_trip)(&machine.counts) {
                    self.transition(machine, State::Open, now, fired);
                }
            }
            State::HalfOpen => self.transition(machine, State::Open, now, fired),
            State::Open => {}
        }
    }

    // == Transitions ==
    /// Applies the lazy time-based transitions.
    fn refresh(&self, machine: &mut Machine, now: Instant, fired: &mut Transitions) {
        let elapsed = machine.expiry.is_some_and(|expiry| expiry <= now);
        match machine.state {
            State::Closed if elapsed => self.start_generation(machine, now),
            State::Open if elapsed => self.transition(machine, State::HalfOpen, now, fired),
            _ => {}
        }
    }

    fn transition(&self, machine: &mut Machine, to: State, now: Instant, fired: &mut Transitions) {
        if machine.state == to {
            return;
        }
        let from = machine.state;
        machine.state = to;
        self.start_generation(machine, now);

        info!(
            breaker = %self.name,
            from = %from,
            to = %to,
            generation = machine.generation,
            "Circuit breaker state changed"
        );
        fired.push((from, to));
    }

    fn start_generation(&self, machine: &mut Machine, now: Instant) {
        machine.generation = machine.generation.wrapping_add(1);
        machine.counts.clear();
        machine.expiry = match machine.state {
            State::Closed if self.interval.is_zero() => None,
            State::Closed => Some(now + self.interval),
            State::Open => Some(now + self.timeout),
            State::HalfOpen => None,
        };
    }

    /// Fires the state change hook outside the lock so it may call back in.
    fn notify(&self, fired: Transitions) {
        if let Some(hook) = &self.on_state_change {
            for (from, to) in fired {
                hook(&self.name, from, to);
            }
        }
    }
}

// == Admission Guard ==
/// Outcome slot for one admitted request; reports a failure if dropped
/// unsettled.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(
                breaker = %self.breaker.name,
                generation = self.generation,
                "Admitted request abandoned before completion"
            );
            self.breaker.after_request(self.generation, false);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("machine", &*self.machine.lock())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::new("test")
                .with_failure_threshold(threshold)
                .with_timeout(Duration::from_millis(timeout_ms)),
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.execute(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_closed_and_passes_results_through() {
        let cb = breaker(3, 50);
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.name(), "test");

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        let err = fail(&cb).await.unwrap_err();
        assert!(matches!(err, BreakerError::Operation("boom")));

        let counts = cb.counts();
        assert_eq!(counts.requests, 2);
        assert_eq!(counts.total_successes, 1);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold_consecutive_failures() {
        let cb = breaker(3, 50);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Closed);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let cb = breaker(1, 50);
        fail(&cb).await.unwrap_err();

        let calls = AtomicUsize::new(0);
        let result: Result<(), BreakerError<&str>> = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_moves_to_half_open_after_timeout() {
        let cb = breaker(1, 50);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);

        tokio::time::advance(Duration::from_millis(49)).await;
        assert_eq!(cb.state(), State::Open);

        tokio::time::advance(Duration::from_millis(11)).await;
        assert_eq!(cb.state(), State::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(1, 50);
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(60)).await;

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 50);
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(60)).await;

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_probe_requests() {
        let cb = CircuitBreaker::new(
            BreakerConfig::new("probe")
                .with_failure_threshold(1)
                .with_max_requests(2)
                .with_timeout(Duration::from_millis(10)),
        );
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(10)).await;

        let first = cb.before_request::<()>().unwrap();
        let second = cb.before_request::<()>().unwrap();
        assert!(matches!(
            cb.before_request::<()>(),
            Err(BreakerError::TooManyRequests)
        ));

        cb.after_request(first, true);
        assert_eq!(cb.state(), State::HalfOpen);
        cb.after_request(second, true);
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_interval_resets_counts() {
        let cb = CircuitBreaker::new(
            BreakerConfig::new("windowed")
                .with_failure_threshold(2)
                .with_interval(Duration::from_secs(1)),
        );
        let generation = cb.generation();

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.counts().consecutive_failures, 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.counts(), Counts::default());
        assert_eq!(cb.generation(), generation + 1);

        // The earlier failure no longer counts toward the threshold
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_completion_is_ignored() {
        let cb = breaker(1, 50);

        let slow = cb.before_request::<()>().unwrap();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cb.state(), State::HalfOpen);
        let before = cb.counts();

        // The slow call from the first closed window reports late
        cb.after_request(slow, false);

        assert_eq!(cb.state(), State::HalfOpen);
        assert_eq!(cb.counts(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_trip_predicate() {
        let cb = CircuitBreaker::new(
            BreakerConfig::new("ratio").with_ready_to_trip(|counts| {
                counts.requests >= 4 && counts.total_failures * 2 >= counts.requests
            }),
        );

        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_change_hook_fires_for_each_transition() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = CircuitBreaker::new(
            BreakerConfig::new("hooked")
                .with_failure_threshold(1)
                .with_timeout(Duration::from_millis(50))
                .with_on_state_change(move |name, from, to| {
                    sink.lock().push((name.to_string(), from, to));
                }),
        );

        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(50)).await;
        succeed(&cb).await.unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("hooked".to_string(), State::Closed, State::Open),
                ("hooked".to_string(), State::Open, State::HalfOpen),
                ("hooked".to_string(), State::HalfOpen, State::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_may_query_breaker() {
        let observed = Arc::new(parking_lot::Mutex::new(None));
        let cb = Arc::new_cyclic(|weak: &std::sync::Weak<CircuitBreaker>| {
            let weak = weak.clone();
            let observed = observed.clone();
            CircuitBreaker::new(
                BreakerConfig::new("reentrant")
                    .with_failure_threshold(1)
                    .with_on_state_change(move |_, _, _| {
                        if let Some(cb) = weak.upgrade() {
                            *observed.lock() = Some(cb.state());
                        }
                    }),
            )
        });

        fail(&cb).await.unwrap_err();
        assert_eq!(*observed.lock(), Some(State::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_counts_as_failure() {
        let cb = breaker(1, 50);

        let result = AssertUnwindSafe(cb.execute(|| async {
            if true {
                panic!("operation blew up");
            }
            Ok::<(), &str>(())
        }))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_cancel_threads_token() {
        let cb = breaker(3, 50);
        let token = CancellationToken::new();

        let seen_cancelled = cb
            .execute_with_cancel(&token, |inner: CancellationToken| async move {
                Ok::<_, &str>(inner.is_cancelled())
            })
            .await
            .unwrap();
        assert!(!seen_cancelled);

        token.cancel();
        let result = cb
            .execute_with_cancel(&token, |_| async { Ok::<_, &str>(()) })
            .await;
        assert!(matches!(result, Err(BreakerError::Cancelled)));
        assert_eq!(cb.counts().requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_probe_frees_slot() {
        let cb = breaker(1, 50);
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cb.execute(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        // The dropped probe counts as a failed one
        assert_eq!(cb.state(), State::Open);
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_from_stale_generation_is_ignored() {
        let cb = breaker(2, 50);

        let pending = cb.execute(|| async { Ok::<_, &str>(()) });
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), State::Open);
        drop(pending);

        // A future that was never polled holds no admission
        assert_eq!(cb.state(), State::Open);

        tokio::time::advance(Duration::from_millis(50)).await;
        let generation = cb.generation();
        let guard = Admission {
            breaker: &cb,
            generation: generation - 1,
            settled: false,
        };
        drop(guard);
        assert_eq!(cb.state(), State::HalfOpen);
        assert_eq!(cb.generation(), generation);
    }

    #[test]
    fn test_zero_settings_are_normalised() {
        let cb = CircuitBreaker::new(BreakerConfig {
            max_requests: 0,
            timeout: Duration::ZERO,
            ..BreakerConfig::default()
        });
        assert_eq!(cb.max_requests, 1);
        assert_eq!(cb.timeout, DEFAULT_TIMEOUT);
    }
}
