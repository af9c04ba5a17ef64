//! Touch sensor used as a limit switch, with hold-duration queries.
//!
//! Each query threshold fires at most once per physical press: a caller can
//! ask for 0 ms, 1000 ms and 2000 ms holds against the same press and get a
//! single `true` from each. Releasing the switch re-arms every threshold.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::{Brick, SensorPort};
use crate::error::SwitchError;
use crate::scheduler::Scheduler;

/// Parameters of a press query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressQuery {
    /// Required hold time in milliseconds, `0` for "pressed now".
    pub duration_ms: u64,
    /// Restart the hold timer once the threshold fires.
    pub reset: bool,
    /// Report this threshold only once until the switch is released.
    pub disable_till_depressed: bool,
}

impl PressQuery {
    /// Pressed right now, reported once per press.
    pub const fn now() -> Self {
        Self {
            duration_ms: 0,
            reset: false,
            disable_till_depressed: true,
        }
    }

    /// Held for longer than `duration_ms`, reported once per press.
    pub const fn held(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            reset: false,
            disable_till_depressed: true,
        }
    }

    /// Set [`PressQuery::reset`].
    pub const fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Set [`PressQuery::disable_till_depressed`].
    pub const fn latching(mut self, disable_till_depressed: bool) -> Self {
        self.disable_till_depressed = disable_till_depressed;
        self
    }
}

impl Default for PressQuery {
    fn default() -> Self {
        Self::now()
    }
}

#[derive(Debug, Default)]
struct SwitchReadState {
    press_started: Option<Duration>,
    disabled: HashSet<u64>,
}

impl SwitchReadState {
    fn clear(&mut self) {
        self.press_started = None;
        self.disabled.clear();
    }

    /// Report a fired threshold unless it already fired during this press.
    fn fire(&mut self, duration_ms: u64, disable_till_depressed: bool) -> bool {
        let disabled = self.disabled.contains(&duration_ms);
        if disable_till_depressed {
            self.disabled.insert(duration_ms);
        }
        !disabled
    }
}

/// Debounced, duration-aware touch switch.
pub struct Switch<B: Brick + ?Sized> {
    brick: Arc<B>,
    port: SensorPort,
    scheduler: Arc<dyn Scheduler>,
    state: SwitchReadState,
    captured: Option<bool>,
}

impl<B: Brick + ?Sized> Switch<B> {
    /// Create a switch on `port`.
    pub fn new(brick: Arc<B>, port: SensorPort, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            brick,
            port,
            scheduler,
            state: SwitchReadState::default(),
            captured: None,
        }
    }

    /// Input port of the switch.
    pub fn port(&self) -> SensorPort {
        self.port
    }

    fn read_raw(&self) -> Result<bool, SwitchError> {
        Ok(self.brick.read_digital_input(self.port)?)
    }

    fn read(&self) -> Result<bool, SwitchError> {
        match self.captured {
            Some(pressed) => Ok(pressed),
            None => self.read_raw(),
        }
    }

    /// Evaluate `query` against the current press.
    pub fn is_pressed_for(&mut self, query: PressQuery) -> Result<bool, SwitchError> {
        if !self.read()? {
            self.state.clear();
            return Ok(false);
        }

        if query.duration_ms == 0 {
            if query.reset {
                self.state.press_started = None;
            }
            return Ok(self.state.fire(0, query.disable_till_depressed));
        }

        let now = self.scheduler.now();
        let started = *self.state.press_started.get_or_insert(now);
        if now.saturating_sub(started) > Duration::from_millis(query.duration_ms) {
            if query.reset {
                self.state.press_started = None;
            }
            let fired = self.state.fire(query.duration_ms, query.disable_till_depressed);
            trace!(port = %self.port, duration_ms = query.duration_ms, fired, "Hold threshold reached");
            return Ok(fired);
        }
        Ok(false)
    }

    /// Pressed now, reported once per press.
    pub fn is_pressed(&mut self) -> Result<bool, SwitchError> {
        self.is_pressed_for(PressQuery::now())
    }

    /// Held longer than `duration_ms`, reported once per press.
    pub fn is_held(&mut self, duration_ms: u64) -> Result<bool, SwitchError> {
        self.is_pressed_for(PressQuery::held(duration_ms))
    }

    /// Not pressed.
    pub fn is_released(&self) -> Result<bool, SwitchError> {
        Ok(!self.read()?)
    }

    /// Block until the switch is pressed or `timeout` passes.
    ///
    /// Always polls the hardware, even inside a read scope. Returns whether
    /// the switch was pressed.
    pub fn wait_for_press(&self, timeout: Duration) -> Result<bool, SwitchError> {
        self.wait_for_press_or(timeout, || false)
    }

    /// Like [`Switch::wait_for_press`], but gives up as soon as `stop`
    /// returns `true`.
    pub fn wait_for_press_or(
        &self,
        timeout: Duration,
        mut stop: impl FnMut() -> bool,
    ) -> Result<bool, SwitchError> {
        let start = self.scheduler.now();
        loop {
            if self.read_raw()? {
                return Ok(true);
            }
            if stop() {
                debug!(port = %self.port, "Stopped waiting for a press");
                return Ok(false);
            }
            if self.scheduler.now().saturating_sub(start) > timeout {
                debug!(port = %self.port, ?timeout, "Gave up waiting for a press");
                return Ok(false);
            }
            self.scheduler.wait(None);
        }
    }

    /// Capture the input once; queries are served from it until
    /// [`Switch::end_snapshot`].
    pub fn begin_snapshot(&mut self) -> Result<(), SwitchError> {
        if self.captured.is_some() {
            return Err(SwitchError::ScopeActive);
        }
        self.captured = Some(self.read_raw()?);
        Ok(())
    }

    /// Drop the captured input so the next query polls the hardware.
    pub fn end_snapshot(&mut self) -> Result<(), SwitchError> {
        if self.captured.take().is_none() {
            return Err(SwitchError::ScopeClosed);
        }
        Ok(())
    }

    /// Open a read scope that ends when the guard is dropped.
    pub fn scope(&mut self) -> Result<SwitchScope<'_, B>, SwitchError> {
        self.begin_snapshot()?;
        Ok(SwitchScope { switch: self })
    }
}

/// Guard of an open read scope; see [`Switch::scope`].
pub struct SwitchScope<'a, B: Brick + ?Sized> {
    switch: &'a mut Switch<B>,
}

impl<B: Brick + ?Sized> Deref for SwitchScope<'_, B> {
    type Target = Switch<B>;

    fn deref(&self) -> &Switch<B> {
        self.switch
    }
}

impl<B: Brick + ?Sized> DerefMut for SwitchScope<'_, B> {
    fn deref_mut(&mut self) -> &mut Switch<B> {
        self.switch
    }
}

impl<B: Brick + ?Sized> Drop for SwitchScope<'_, B> {
    fn drop(&mut self) {
        self.switch.captured = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Method, MotorPort};
    use crate::scheduler::ManualClock;
    use crate::sim::{SimBrick, SimInput};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn setup(input: SimInput) -> (Arc<ManualClock>, Switch<SimBrick>) {
        let clock = Arc::new(ManualClock::new(30));
        let brick = Arc::new(SimBrick::new(Method::Usb, clock.clone()));
        brick.add_input(SensorPort::S1, input);
        let switch = Switch::new(brick, SensorPort::S1, clock.clone());
        (clock, switch)
    }

    #[test]
    fn test_hold_fires_once_per_press() {
        let (clock, mut switch) = setup(SimInput::Windows(vec![ms(0)..ms(3000), ms(4000)..ms(6000)]));

        assert!(!switch.is_held(1000).unwrap());
        clock.advance(ms(500));
        assert!(!switch.is_held(1000).unwrap());
        clock.advance(ms(600));
        assert!(switch.is_held(1000).unwrap());
        clock.advance(ms(100));
        assert!(!switch.is_held(1000).unwrap());
        clock.advance(ms(1000));
        assert!(!switch.is_held(1000).unwrap());

        // Released, then pressed again at 4 s.
        clock.advance(ms(1000));
        assert!(!switch.is_held(1000).unwrap());
        clock.advance(ms(900));
        assert!(!switch.is_held(1000).unwrap());
        clock.advance(ms(1100));
        assert!(switch.is_held(1000).unwrap());
    }

    #[test]
    fn test_pressed_now_fires_once_per_press() {
        let (clock, mut switch) = setup(SimInput::Windows(vec![ms(0)..ms(200), ms(300)..ms(500)]));

        assert!(switch.is_pressed().unwrap());
        assert!(!switch.is_pressed().unwrap());
        clock.advance(ms(100));
        assert!(!switch.is_pressed().unwrap());

        clock.advance(ms(150));
        assert!(!switch.is_pressed().unwrap());
        assert!(switch.is_released().unwrap());

        clock.advance(ms(100));
        assert!(switch.is_pressed().unwrap());
        assert!(!switch.is_pressed().unwrap());
    }

    #[test]
    fn test_thresholds_latch_independently() {
        let (clock, mut switch) = setup(SimInput::Level(true));

        assert!(switch.is_pressed().unwrap());
        assert!(!switch.is_held(1000).unwrap());
        assert!(!switch.is_held(2000).unwrap());
        clock.advance(ms(1500));
        assert!(!switch.is_pressed().unwrap());
        assert!(switch.is_held(1000).unwrap());
        assert!(!switch.is_held(2000).unwrap());
        clock.advance(ms(1000));
        assert!(!switch.is_held(1000).unwrap());
        assert!(switch.is_held(2000).unwrap());
    }

    #[test]
    fn test_non_latching_query_repeats() {
        let (_clock, mut switch) = setup(SimInput::Level(true));
        let query = PressQuery::now().latching(false);
        assert!(switch.is_pressed_for(query).unwrap());
        assert!(switch.is_pressed_for(query).unwrap());
    }

    #[test]
    fn test_reset_restarts_hold_timer() {
        let (clock, mut switch) = setup(SimInput::Level(true));
        let query = PressQuery::held(100).with_reset(true).latching(false);

        assert!(!switch.is_pressed_for(query).unwrap());
        clock.advance(ms(150));
        assert!(switch.is_pressed_for(query).unwrap());
        // The timer restarts on the next query, at 200 ms.
        clock.advance(ms(50));
        assert!(!switch.is_pressed_for(query).unwrap());
        clock.advance(ms(100));
        assert!(!switch.is_pressed_for(query).unwrap());
        clock.advance(ms(50));
        assert!(switch.is_pressed_for(query).unwrap());
    }

    #[test]
    fn test_scope_serves_captured_value() {
        let (clock, mut switch) = setup(SimInput::Windows(vec![ms(0)..ms(100)]));
        {
            let mut scope = switch.scope().unwrap();
            clock.advance(ms(200));
            assert!(scope.is_pressed().unwrap());
            assert!(!scope.is_released().unwrap());
        }
        assert!(switch.is_released().unwrap());
    }

    #[test]
    fn test_scope_misuse_is_reported() {
        let (_clock, mut switch) = setup(SimInput::Level(false));
        assert_eq!(switch.end_snapshot(), Err(SwitchError::ScopeClosed));
        switch.begin_snapshot().unwrap();
        assert_eq!(switch.begin_snapshot(), Err(SwitchError::ScopeActive));
        switch.end_snapshot().unwrap();
        assert!(switch.scope().is_ok());
        // The guard above was dropped, so a new snapshot can begin.
        switch.begin_snapshot().unwrap();
    }

    #[test]
    fn test_wait_for_press_returns_on_press() {
        let (clock, switch) = setup(SimInput::Windows(vec![ms(2000)..ms(2500)]));
        assert!(switch.wait_for_press(Duration::from_secs(10)).unwrap());
        assert!(clock.now() >= ms(2000));
        assert!(clock.now() < ms(2100));
    }

    #[test]
    fn test_wait_for_press_times_out() {
        let (clock, switch) = setup(SimInput::Level(false));
        assert!(!switch.wait_for_press(Duration::from_secs(3)).unwrap());
        assert!(clock.now() > Duration::from_secs(3));
    }

    #[test]
    fn test_wait_for_press_gives_up_when_stopped() {
        let (clock, switch) = setup(SimInput::Level(false));
        let deadline = ms(500);
        let pressed = switch
            .wait_for_press_or(Duration::from_secs(120), || clock.now() >= deadline)
            .unwrap();
        assert!(!pressed);
        assert!(clock.now() < ms(600));
    }

    #[test]
    fn test_unwired_port_is_a_bus_error() {
        let clock = Arc::new(ManualClock::new(30));
        let brick = Arc::new(SimBrick::new(Method::Usb, clock.clone()));
        brick.add_motor(MotorPort::A);
        let mut switch = Switch::new(brick, SensorPort::S3, clock);
        assert!(matches!(switch.is_pressed(), Err(SwitchError::Bus(_))));
    }
}
