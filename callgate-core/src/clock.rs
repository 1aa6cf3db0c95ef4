//! Time abstractions for testability
//!
//! Breakers, limiters and backoff sleeps all read time through the [`Clock`]
//! trait so tests can drive them deterministically. [`SystemClock`] is backed
//! by tokio's timer and therefore also honours a paused tokio runtime
//! (`#[tokio::test(start_paused = true)]`). [`MockClock`] is a virtual clock
//! whose sleepers wait on deadlines in virtual time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Instant in time (monotonic clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64); // Microseconds since the clock's origin

impl Instant {
    /// Create from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get microseconds value
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Duration since another instant, saturating at zero
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    /// Instant shifted back by `duration`, saturating at the origin
    pub fn saturating_sub(&self, duration: Duration) -> Instant {
        Instant(self.0.saturating_sub(duration_micros(duration)))
    }
}

/// Abstraction for time operations
#[async_trait]
pub trait Clock: Send + Sync {
    /// Get current instant (monotonic)
    fn now(&self) -> Instant;

    /// Get current wall-clock time, used for error and metrics timestamps
    fn wall_time(&self) -> DateTime<Utc>;

    /// Sleep for a duration
    async fn sleep(&self, duration: Duration);
}

/// Returned by [`timeout`] when the timer wins the race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

/// Race `future` against a timer driven by `clock`.
///
/// The future is polled first on every wake-up, so an operation that is ready
/// at the same moment the timer fires still wins. The losing future is dropped.
pub async fn timeout<C, F>(clock: &C, duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    C: Clock + ?Sized,
    F: Future,
{
    let timer = clock.sleep(duration);
    tokio::pin!(future);

    tokio::select! {
        biased;
        output = &mut future => Ok(output),
        _ = timer => Err(Elapsed(duration)),
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Production clock backed by tokio's timer
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Create new instance; instants are measured from this moment
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_micros(duration_micros(self.origin.elapsed()))
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct MockClockState {
    current_micros: u64,
    sleeps: Vec<Duration>,
    /// Deadlines of sleepers still waiting, keyed by (deadline, registration order)
    pending: BTreeSet<(u64, u64)>,
    next_sleeper: u64,
}

/// What a registered sleeper should do next
enum SleepStep {
    Done,
    Wait,
    Advance,
}

/// Virtual clock for deterministic testing.
///
/// `sleep` registers a deadline and waits until virtual time reaches it. Time
/// moves through [`MockClock::advance`], or, for an auto-advancing clock (the
/// default), by jumping to the earliest pending deadline once the sleeper that
/// owns it has yielded and no earlier deadline showed up. Concurrent sleeps
/// therefore overlap the way timers do. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<MockClockState>>,
    time_advanced: Arc<Notify>,
    auto_advance: bool,
    epoch: DateTime<Utc>,
}

impl MockClock {
    /// Create an auto-advancing mock clock starting at zero
    pub fn new() -> Self {
        Self::with_epoch(DateTime::<Utc>::default())
    }

    /// Create a mock clock whose sleepers only wake through [`MockClock::advance`]
    pub fn manual() -> Self {
        Self {
            auto_advance: false,
            ..Self::new()
        }
    }

    /// Create an auto-advancing mock clock whose wall time starts at `epoch`
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockClockState::default())),
            time_advanced: Arc::new(Notify::new()),
            auto_advance: true,
            epoch,
        }
    }

    /// Advance time by duration, waking every sleeper whose deadline passed
    pub fn advance(&self, duration: Duration) {
        {
            let mut state = self.state.lock();
            state.current_micros = state.current_micros.saturating_add(duration_micros(duration));
        }
        self.time_advanced.notify_waiters();
    }

    /// Total virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.state.lock().current_micros)
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Number of sleepers waiting for their deadline
    pub fn pending_sleeps(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn next_step(&self, key: (u64, u64)) -> SleepStep {
        let state = self.state.lock();
        if state.current_micros >= key.0 {
            SleepStep::Done
        } else if self.auto_advance && state.pending.first() == Some(&key) {
            SleepStep::Advance
        } else {
            SleepStep::Wait
        }
    }

    /// Move time to `key`'s deadline if it is still the earliest one
    fn advance_to(&self, key: (u64, u64)) -> bool {
        {
            let mut state = self.state.lock();
            if state.current_micros < key.0 {
                if state.pending.first() != Some(&key) {
                    return false;
                }
                state.current_micros = key.0;
            }
        }
        self.time_advanced.notify_waiters();
        true
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters a sleeper when it finishes or is dropped mid-wait
struct PendingSleep<'a> {
    clock: &'a MockClock,
    key: (u64, u64),
}

impl Drop for PendingSleep<'_> {
    fn drop(&mut self) {
        self.clock.state.lock().pending.remove(&self.key);
        // The next earliest sleeper may now be allowed to advance
        self.clock.time_advanced.notify_waiters();
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.state.lock().current_micros)
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let elapsed = self.elapsed();
        self.epoch + chrono::Duration::microseconds(duration_micros(elapsed) as i64)
    }

    async fn sleep(&self, duration: Duration) {
        let sleeper = {
            let mut state = self.state.lock();
            state.sleeps.push(duration);
            let deadline = state.current_micros.saturating_add(duration_micros(duration));
            let key = (deadline, state.next_sleeper);
            state.next_sleeper += 1;
            state.pending.insert(key);
            PendingSleep { clock: self, key }
        };

        loop {
            let notified = self.time_advanced.notified();
            tokio::pin!(notified);
            // Register interest before checking so an advance in between is not lost
            notified.as_mut().enable();

            match self.next_step(sleeper.key) {
                SleepStep::Done => break,
                SleepStep::Wait => notified.await,
                SleepStep::Advance => {
                    // Let peers that are ready register their own deadlines first
                    tokio::task::yield_now().await;
                    if self.advance_to(sleeper.key) {
                        break;
                    }
                }
            }
        }
    }
}
