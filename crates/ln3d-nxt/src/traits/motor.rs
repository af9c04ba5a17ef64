//! Motor state model and the [`Motor`] trait with its precision turn.

use core::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::bus::{Method, MotorPort};
use crate::error::MotorError;
use crate::scheduler::Scheduler;

/// Smallest turn the loop will request; shorter turns never get the motor moving.
pub const MIN_TACHO_UNITS: i32 = 10;

/// Distance from target under which the loop polls every tick instead of slowly.
pub const NEAR_WINDOW: i32 = 100;

/// Poll interval while the motor is far from its target.
pub const FAR_POLL: Duration = Duration::from_millis(100);

/// Enabled features of an output port (bitset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct MotorMode(pub u8);

impl MotorMode {
    /// No feature enabled, the motor floats.
    pub const IDLE: MotorMode = MotorMode(0x00);
    /// Power is applied.
    pub const MOTOR_ON: MotorMode = MotorMode(0x01);
    /// Electronic braking between PWM pulses.
    pub const BRAKE: MotorMode = MotorMode(0x02);
    /// Firmware regulation is enabled.
    pub const REGULATED: MotorMode = MotorMode(0x04);

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: MotorMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MotorMode {
    type Output = MotorMode;

    fn bitor(self, rhs: MotorMode) -> MotorMode {
        MotorMode(self.0 | rhs.0)
    }
}

/// Firmware regulation applied to an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum RegulationMode {
    /// No regulation.
    #[default]
    Idle = 0,
    /// Keep speed constant under load.
    MotorSpeed = 1,
    /// Synchronise two motors.
    MotorSync = 2,
}

/// Run state of an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum RunState {
    /// Output is off.
    #[default]
    Idle = 0x00,
    /// Power ramps up to the requested value.
    RampUp = 0x10,
    /// Running at the requested power.
    Running = 0x20,
    /// Power ramps down.
    RampDown = 0x40,
}

/// Fields of [`MotorState`] that can be read through a unified view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    /// [`MotorState::power`].
    Power,
    /// [`MotorState::mode`].
    Mode,
    /// [`MotorState::regulation_mode`].
    RegulationMode,
    /// [`MotorState::turn_ratio`].
    TurnRatio,
    /// [`MotorState::run_state`].
    RunState,
    /// [`MotorState::tacho_limit`].
    TachoLimit,
}

impl StateField {
    /// Every field, in wire order.
    pub const ALL: [StateField; 6] = [
        StateField::Power,
        StateField::Mode,
        StateField::RegulationMode,
        StateField::TurnRatio,
        StateField::RunState,
        StateField::TachoLimit,
    ];
}

/// Output state of one motor port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorState {
    /// Signed drive strength, -100..=100.
    pub power: i32,
    /// Enabled features.
    pub mode: MotorMode,
    /// Firmware regulation.
    pub regulation_mode: RegulationMode,
    /// Steering bias for synchronised motors.
    pub turn_ratio: i32,
    /// Run state.
    pub run_state: RunState,
    /// Hardware stop angle, `0` runs forever.
    pub tacho_limit: u32,
}

impl MotorState {
    /// Integer view of a field, used for comparisons and reporting.
    pub fn raw(&self, field: StateField) -> i32 {
        match field {
            StateField::Power => self.power,
            StateField::Mode => i32::from(self.mode.0),
            StateField::RegulationMode => self.regulation_mode as i32,
            StateField::TurnRatio => self.turn_ratio,
            StateField::RunState => self.run_state as i32,
            StateField::TachoLimit => self.tacho_limit as i32,
        }
    }
}

/// Rotation counters of one motor, captured once per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TachoSnapshot {
    /// Cumulative rotation in sensor units.
    pub tacho_count: i32,
    /// Rotation since the last relative position reset.
    pub block_tacho_count: Option<i32>,
    /// Rotation since the last absolute position reset.
    pub rotation_count: Option<i32>,
}

impl TachoSnapshot {
    /// Snapshot with only the tacho count populated.
    pub const fn new(tacho_count: i32) -> Self {
        Self {
            tacho_count,
            block_tacho_count: None,
            rotation_count: None,
        }
    }

    /// Projected snapshot after moving `tacho_limit` units in `direction`.
    ///
    /// # Errors
    ///
    /// [`MotorError::InvalidArgument`] unless `direction` is `1` or `-1`,
    /// or when the target does not fit the tacho counter.
    pub fn get_target(&self, tacho_limit: i32, direction: i32) -> Result<Self, MotorError> {
        if direction.abs() != 1 {
            return Err(MotorError::InvalidArgument("direction must be 1 or -1"));
        }
        direction
            .checked_mul(tacho_limit)
            .and_then(|delta| self.tacho_count.checked_add(delta))
            .map(Self::new)
            .ok_or(MotorError::InvalidArgument("target out of tacho counter range"))
    }

    /// Whether this snapshot is closer than `threshold` to `target`.
    pub fn is_near(&self, target: &Self, threshold: i32) -> bool {
        (i64::from(target.tacho_count) - i64::from(self.tacho_count)).abs() < i64::from(threshold)
    }

    /// Whether this snapshot is past `target` when travelling in `direction`.
    pub fn is_greater(&self, target: &Self, direction: i32) -> bool {
        i64::from(direction) * (i64::from(self.tacho_count) - i64::from(target.tacho_count)) > 0
    }

    /// Same snapshot seen from a mirrored mounting.
    pub fn inverted(self) -> Self {
        Self {
            tacho_count: self.tacho_count.saturating_neg(),
            block_tacho_count: self.block_tacho_count.map(i32::saturating_neg),
            rotation_count: self.rotation_count.map(i32::saturating_neg),
        }
    }
}

/// Options for [`Motor::turn`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnOptions {
    /// Hold position at the end (`true`) or let the motor spin freely.
    pub brake: bool,
    /// How long the motor may stay blocked before the turn gives up.
    pub timeout: Duration,
    /// Track the target in software only; when `false` the hardware tacho
    /// limit is written as well.
    pub emulate: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            brake: true,
            timeout: Duration::from_secs(1),
            emulate: true,
        }
    }
}

/// Capability of a single actuator on the brick.
///
/// Implementors only provide raw state access; driving, braking and the
/// precision turn are built on top of it.
pub trait Motor {
    /// Output port driven by this motor.
    fn port(&self) -> MotorPort;

    /// Channel used to reach the brick.
    fn method(&self) -> Method;

    /// Scheduler used by the control loops.
    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Read the output state and tacho counters from the brick.
    fn read_state(&mut self) -> Result<(MotorState, TachoSnapshot), MotorError>;

    /// Write an output state to the brick.
    fn set_state(&mut self, state: MotorState) -> Result<(), MotorError>;

    /// Reset the block tacho counter (`relative`) or the program counter.
    fn reset_position(&mut self, relative: bool) -> Result<(), MotorError>;

    /// Fresh state ready to drive the motor: motor on, running, no limit.
    fn new_state(&mut self) -> Result<MotorState, MotorError> {
        let (mut state, _) = self.read_state()?;
        state.mode = state.mode | MotorMode::MOTOR_ON;
        state.run_state = RunState::Running;
        state.tacho_limit = 0;
        Ok(state)
    }

    /// Current tacho counters.
    fn get_tacho(&mut self) -> Result<TachoSnapshot, MotorError> {
        Ok(self.read_state()?.1)
    }

    /// Stopping tolerance for the current channel.
    fn threshold(&self) -> i32 {
        self.method().threshold()
    }

    /// Run forever at `power`. Call [`Motor::idle`] afterwards.
    fn run(&mut self, power: i32, regulated: bool) -> Result<(), MotorError> {
        let mut state = self.new_state()?;
        state.power = power;
        if regulated {
            state.mode = MotorMode::MOTOR_ON | MotorMode::REGULATED;
            state.regulation_mode = RegulationMode::MotorSpeed;
        } else {
            state.mode = MotorMode::MOTOR_ON;
            state.regulation_mode = RegulationMode::Idle;
        }
        state.run_state = RunState::Running;
        state.tacho_limit = 0;
        self.set_state(state)
    }

    /// Hold the current position.
    fn brake(&mut self) -> Result<(), MotorError> {
        let mut state = self.new_state()?;
        state.power = 0;
        state.mode = MotorMode::MOTOR_ON | MotorMode::BRAKE | MotorMode::REGULATED;
        state.regulation_mode = RegulationMode::MotorSpeed;
        state.run_state = RunState::Running;
        state.tacho_limit = 0;
        self.set_state(state)
    }

    /// Cut power and let the motor spin freely.
    fn idle(&mut self) -> Result<(), MotorError> {
        let mut state = self.new_state()?;
        state.power = 0;
        state.mode = MotorMode::IDLE;
        state.regulation_mode = RegulationMode::Idle;
        state.run_state = RunState::Idle;
        state.tacho_limit = 0;
        self.set_state(state)
    }

    /// No progress in `direction` since `last_tacho`.
    fn is_blocked(&self, tacho: &TachoSnapshot, last_tacho: &TachoSnapshot, direction: i32) -> bool {
        i64::from(direction) * (i64::from(last_tacho.tacho_count) - i64::from(tacho.tacho_count)) >= 0
    }

    /// Rough time to reach `target` at `power`.
    fn eta(&self, tacho: &TachoSnapshot, target: &TachoSnapshot, power: i32) -> Duration {
        if power == 0 {
            return Duration::MAX;
        }
        let units = (f64::from(tacho.tacho_count) - f64::from(target.tacho_count)).abs();
        Duration::from_secs_f64(units / f64::from(power.abs()) / 9.0)
    }

    /// Turn `tacho_units` in the direction of `power`, then brake or idle.
    ///
    /// The loop ends when `stop` returns `true` or the motor is within the
    /// channel threshold of (or past) its target. A motor that makes no
    /// progress for longer than `options.timeout` ends the turn: successfully
    /// when it is already within threshold, with [`MotorError::Blocked`]
    /// otherwise. The final brake or idle is issued on every exit path.
    ///
    /// # Errors
    ///
    /// [`MotorError::InvalidArgument`] for negative `tacho_units` or zero
    /// `power`, raised before any hardware I/O.
    fn turn(
        &mut self,
        power: i32,
        tacho_units: i32,
        options: TurnOptions,
        mut stop: impl FnMut() -> bool,
    ) -> Result<(), MotorError>
    where
        Self: Sized,
    {
        if tacho_units < 0 {
            return Err(MotorError::InvalidArgument("tacho_units must be non-negative"));
        }
        let direction = power.signum();
        if direction == 0 {
            return Err(MotorError::InvalidArgument("power must be non-zero"));
        }
        let tacho_limit = tacho_units.max(MIN_TACHO_UNITS);
        let threshold = self.threshold();

        let tacho = self.get_tacho()?;
        let target = tacho.get_target(tacho_limit, direction)?;
        let mut state = self.new_state()?;
        state.power = power;
        if !options.emulate {
            state.tacho_limit = tacho_limit as u32;
        }
        self.set_state(state)?;
        debug!(port = %self.port(), power, from = tacho.tacho_count, target = target.tacho_count, "Turn started");

        let result = track_turn(self, tacho, &target, direction, threshold, options.timeout, &mut stop);
        let cleanup = if options.brake { self.brake() } else { self.idle() };
        result.and(cleanup)
    }
}

fn track_turn<M: Motor>(
    motor: &mut M,
    mut tacho: TachoSnapshot,
    target: &TachoSnapshot,
    direction: i32,
    threshold: i32,
    timeout: Duration,
    stop: &mut impl FnMut() -> bool,
) -> Result<(), MotorError> {
    let clock = motor.scheduler();
    let mut blocked = false;
    let mut current_time = clock.now();
    let mut last_time = current_time;
    let mut last_tacho = tacho;

    while !stop() {
        if tacho.is_near(target, NEAR_WINDOW) {
            clock.wait(None);
        } else {
            clock.wait(Some(FAR_POLL));
        }

        // While blocked the reference stays put so the stall can be timed.
        if !blocked {
            last_tacho = tacho;
            last_time = current_time;
            current_time = clock.now();
        }

        tacho = motor.get_tacho()?;
        blocked = motor.is_blocked(&tacho, &last_tacho, direction);
        trace!(port = %motor.port(), tacho = tacho.tacho_count, blocked, "Turn tick");

        if blocked && clock.now().saturating_sub(last_time) > timeout {
            if tacho.is_near(target, threshold) {
                debug!(port = %motor.port(), tacho = tacho.tacho_count, "Blocked within threshold, turn done");
                break;
            }
            return Err(MotorError::Blocked {
                tacho: tacho.tacho_count,
                target: target.tacho_count,
            });
        }

        if tacho.is_near(target, threshold) || tacho.is_greater(target, direction) {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_target_adds_and_subtracts() {
        let tacho = TachoSnapshot::new(100);
        assert_eq!(tacho.get_target(90, 1).unwrap().tacho_count, 190);
        assert_eq!(tacho.get_target(90, -1).unwrap().tacho_count, 10);
    }

    #[test]
    fn test_get_target_rejects_bad_direction() {
        let tacho = TachoSnapshot::new(0);
        for direction in [0, 2, -3] {
            assert!(matches!(
                tacho.get_target(10, direction),
                Err(MotorError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_get_target_rejects_counter_overflow() {
        let tacho = TachoSnapshot::new(10);
        assert_eq!(
            tacho.get_target(i32::MAX, 1),
            Err(MotorError::InvalidArgument("target out of tacho counter range"))
        );
        assert_eq!(tacho.get_target(i32::MAX, -1).unwrap().tacho_count, 10 - i32::MAX);
    }

    #[test]
    fn test_comparisons_hold_at_counter_extremes() {
        let low = TachoSnapshot::new(i32::MIN);
        let high = TachoSnapshot::new(i32::MAX);
        assert!(!low.is_near(&high, 100));
        assert!(high.is_greater(&low, 1));
        assert!(low.is_greater(&high, -1));
    }

    #[test]
    fn test_is_near_is_strict() {
        let target = TachoSnapshot::new(100);
        assert!(TachoSnapshot::new(96).is_near(&target, 5));
        assert!(!TachoSnapshot::new(95).is_near(&target, 5));
        assert!(TachoSnapshot::new(104).is_near(&target, 5));
    }

    #[test]
    fn test_is_greater_follows_direction() {
        let target = TachoSnapshot::new(100);
        assert!(TachoSnapshot::new(101).is_greater(&target, 1));
        assert!(!TachoSnapshot::new(100).is_greater(&target, 1));
        assert!(TachoSnapshot::new(99).is_greater(&target, -1));
    }

    #[test]
    fn test_inverted_negates_populated_fields_only() {
        let tacho = TachoSnapshot {
            tacho_count: 42,
            block_tacho_count: Some(-7),
            rotation_count: None,
        };
        let inverted = tacho.inverted();
        assert_eq!(inverted.tacho_count, -42);
        assert_eq!(inverted.block_tacho_count, Some(7));
        assert_eq!(inverted.rotation_count, None);
    }

    #[test]
    fn test_mode_bits() {
        let mode = MotorMode::MOTOR_ON | MotorMode::BRAKE;
        assert!(mode.contains(MotorMode::MOTOR_ON));
        assert!(!mode.contains(MotorMode::REGULATED));
        assert_eq!(mode.0, 0x03);
    }

    #[test]
    fn test_raw_field_view() {
        let state = MotorState {
            power: -40,
            mode: MotorMode::MOTOR_ON,
            regulation_mode: RegulationMode::MotorSync,
            turn_ratio: 5,
            run_state: RunState::Running,
            tacho_limit: 360,
        };
        assert_eq!(state.raw(StateField::Power), -40);
        assert_eq!(state.raw(StateField::Mode), 1);
        assert_eq!(state.raw(StateField::RegulationMode), 2);
        assert_eq!(state.raw(StateField::RunState), 0x20);
        assert_eq!(state.raw(StateField::TachoLimit), 360);
    }
}
