//! Time source and cooperative sleep shared by every control loop.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spin_sleep::SpinSleeper;

/// Wall-clock source and sleep primitive.
///
/// `wait` and `now` are the only suspension and timing points of the control
/// loops, so swapping the implementation makes them deterministic in tests.
pub trait Scheduler: Send + Sync {
    /// Loop rate in Hz used when `wait` is called without a duration.
    fn frequency(&self) -> u32;

    /// Monotonic time elapsed since the scheduler was created.
    fn now(&self) -> Duration;

    /// Sleep for `duration`, or one tick (`1 / frequency`) when `None`.
    fn wait(&self, duration: Option<Duration>);

    /// Length of one tick.
    fn tick(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frequency().max(1)))
    }
}

/// Real-time scheduler backed by [`Instant`] and a spin sleeper.
#[derive(Debug)]
pub struct Ticker {
    frequency: u32,
    start: Instant,
    sleeper: SpinSleeper,
}

impl Ticker {
    /// Create a ticker running at `frequency` Hz.
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            start: Instant::now(),
            sleeper: SpinSleeper::default(),
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new(30)
    }
}

impl Scheduler for Ticker {
    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn wait(&self, duration: Option<Duration>) {
        let duration = duration.unwrap_or_else(|| self.tick());
        self.sleeper.sleep(duration);
    }
}

/// Virtual clock: `wait` advances time without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    frequency: u32,
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock at time zero ticking at `frequency` Hz.
    pub fn new(frequency: u32) -> Self {
        Self {
            frequency,
            now: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(30)
    }
}

impl Scheduler for ManualClock {
    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn wait(&self, duration: Option<Duration>) {
        let duration = duration.unwrap_or_else(|| self.tick());
        self.advance(duration);
    }
}
