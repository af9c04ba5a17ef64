//! In-process brick used by tests and by the command-line demo.
//!
//! Motors integrate `power * speed * dt` while powered, touch sensors follow
//! a level, scripted press windows or a motor position, and every command
//! the brick receives is logged for inspection.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::bus::{Brick, Method, MotorPort, SensorPort};
use crate::error::BusError;
use crate::scheduler::Scheduler;
use crate::traits::motor::{MotorMode, MotorState, RunState, TachoSnapshot};

/// Default simulated speed: tacho units per second per unit of power.
pub const DEFAULT_SPEED: f64 = 10.0;

/// Command received by a [`SimBrick`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    /// Output state written to a motor port.
    Write {
        /// Target port.
        port: MotorPort,
        /// State as received on the wire.
        state: MotorState,
    },
    /// Motor position reset.
    Reset {
        /// Target port.
        port: MotorPort,
        /// Block counter (`true`) or program counter.
        relative: bool,
    },
    /// Tone played.
    Tone {
        /// Frequency in Hz.
        frequency: u16,
        /// Length in milliseconds.
        duration_ms: u16,
    },
    /// Sound file played.
    Clip {
        /// Whether the caller waited for the clip.
        blocking: bool,
        /// File name on the brick.
        clip: String,
    },
}

/// Behaviour of a simulated touch sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SimInput {
    /// Fixed level.
    Level(bool),
    /// Pressed while the clock is inside any window.
    Windows(Vec<Range<Duration>>),
    /// Limit switch: pressed once `port` has travelled to `position` moving
    /// in `toward` (`1` or `-1`).
    Limit {
        /// Motor whose position trips the switch.
        port: MotorPort,
        /// Tacho count where the switch closes.
        position: i32,
        /// Direction of travel that closes the switch.
        toward: i32,
    },
    /// Pressed while any of the inner inputs is pressed.
    AnyOf(Vec<SimInput>),
}

#[derive(Debug)]
struct SimMotor {
    state: MotorState,
    position: f64,
    block_origin: i32,
    rotation_origin: i32,
    stalled: bool,
    updated: Duration,
}

impl SimMotor {
    fn new(now: Duration) -> Self {
        Self {
            state: MotorState::default(),
            position: 0.0,
            block_origin: 0,
            rotation_origin: 0,
            stalled: false,
            updated: now,
        }
    }

    fn is_driven(&self) -> bool {
        self.state.mode.contains(MotorMode::MOTOR_ON)
            && self.state.run_state == RunState::Running
            && self.state.power != 0
            && !self.stalled
    }

    fn advance(&mut self, now: Duration, speed: f64) {
        let dt = now.saturating_sub(self.updated).as_secs_f64();
        if self.is_driven() {
            self.position += f64::from(self.state.power) * speed * dt;
        }
        self.updated = now;
    }

    fn tacho_count(&self) -> i32 {
        self.position.round() as i32
    }

    fn snapshot(&self) -> TachoSnapshot {
        let tacho_count = self.tacho_count();
        TachoSnapshot {
            tacho_count,
            block_tacho_count: Some(tacho_count - self.block_origin),
            rotation_count: Some(tacho_count - self.rotation_origin),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    motors: HashMap<MotorPort, SimMotor>,
    inputs: HashMap<SensorPort, SimInput>,
    commands: Vec<SimCommand>,
}

/// Simulated NXT brick.
pub struct SimBrick {
    method: Method,
    speed: f64,
    clock: Arc<dyn Scheduler>,
    inner: Mutex<SimState>,
}

impl SimBrick {
    /// Create an empty brick reachable over `method`, timed by `clock`.
    pub fn new(method: Method, clock: Arc<dyn Scheduler>) -> Self {
        Self {
            method,
            speed: DEFAULT_SPEED,
            clock,
            inner: Mutex::new(SimState::default()),
        }
    }

    /// Set the motor speed in tacho units per second per unit of power.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Attach a motor to `port`.
    pub fn add_motor(&self, port: MotorPort) {
        let now = self.clock.now();
        self.inner.lock().motors.insert(port, SimMotor::new(now));
    }

    /// Attach a touch sensor to `port`.
    pub fn add_input(&self, port: SensorPort, input: SimInput) {
        self.inner.lock().inputs.insert(port, input);
    }

    /// Jam or free a motor. A stalled motor accepts commands but does not turn.
    pub fn set_stalled(&self, port: MotorPort, stalled: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(motor) = inner.motors.get_mut(&port) {
            motor.advance(now, self.speed);
            motor.stalled = stalled;
        }
    }

    /// Move a motor by hand, as if its wheel were turned.
    pub fn nudge(&self, port: MotorPort, units: i32) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(motor) = inner.motors.get_mut(&port) {
            motor.advance(now, self.speed);
            motor.position += f64::from(units);
        }
    }

    /// Current physical tacho count of a motor.
    pub fn position(&self, port: MotorPort) -> Option<i32> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.motors.get_mut(&port).map(|motor| {
            motor.advance(now, self.speed);
            motor.tacho_count()
        })
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.inner.lock().commands.clone()
    }

    /// States written to `port`, oldest first.
    pub fn writes_to(&self, port: MotorPort) -> Vec<MotorState> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                SimCommand::Write { port: p, state } if *p == port => Some(*state),
                _ => None,
            })
            .collect()
    }

    /// Number of brake commands written to `port`.
    pub fn brake_count(&self, port: MotorPort) -> usize {
        self.writes_to(port)
            .iter()
            .filter(|state| state.mode.contains(MotorMode::BRAKE) && state.power == 0)
            .count()
    }

    /// Number of idle commands written to `port`.
    pub fn idle_count(&self, port: MotorPort) -> usize {
        self.writes_to(port)
            .iter()
            .filter(|state| state.mode == MotorMode::IDLE && state.run_state == RunState::Idle)
            .count()
    }

    fn input_level(inner: &mut SimState, input: &SimInput, now: Duration, speed: f64) -> Result<bool, BusError> {
        let pressed = match input {
            SimInput::Level(level) => *level,
            SimInput::Windows(windows) => windows.iter().any(|window| window.contains(&now)),
            SimInput::Limit {
                port,
                position,
                toward,
            } => {
                let motor = inner.motors.get_mut(port).ok_or(BusError::UnknownMotor(*port))?;
                motor.advance(now, speed);
                toward * (motor.tacho_count() - position) >= 0
            }
            SimInput::AnyOf(inputs) => {
                let mut any = false;
                for input in inputs {
                    any |= Self::input_level(inner, input, now, speed)?;
                }
                any
            }
        };
        Ok(pressed)
    }
}

impl Brick for SimBrick {
    fn method(&self) -> Method {
        self.method
    }

    fn read_output_state(&self, port: MotorPort) -> Result<(MotorState, TachoSnapshot), BusError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let motor = inner.motors.get_mut(&port).ok_or(BusError::UnknownMotor(port))?;
        motor.advance(now, self.speed);
        Ok((motor.state, motor.snapshot()))
    }

    fn write_output_state(&self, port: MotorPort, state: &MotorState) -> Result<(), BusError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let motor = inner.motors.get_mut(&port).ok_or(BusError::UnknownMotor(port))?;
        motor.advance(now, self.speed);
        motor.state = *state;
        trace!(%port, power = state.power, mode = state.mode.0, "Sim write");
        inner.commands.push(SimCommand::Write { port, state: *state });
        Ok(())
    }

    fn reset_motor_position(&self, port: MotorPort, relative: bool) -> Result<(), BusError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let motor = inner.motors.get_mut(&port).ok_or(BusError::UnknownMotor(port))?;
        motor.advance(now, self.speed);
        if relative {
            motor.block_origin = motor.tacho_count();
        } else {
            motor.rotation_origin = motor.tacho_count();
        }
        inner.commands.push(SimCommand::Reset { port, relative });
        Ok(())
    }

    fn read_digital_input(&self, port: SensorPort) -> Result<bool, BusError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let input = inner
            .inputs
            .get(&port)
            .cloned()
            .ok_or(BusError::UnknownSensor(port))?;
        Self::input_level(&mut inner, &input, now, self.speed)
    }

    fn emit_tone(&self, frequency: u16, duration_ms: u16) -> Result<(), BusError> {
        self.inner.lock().commands.push(SimCommand::Tone {
            frequency,
            duration_ms,
        });
        Ok(())
    }

    fn play_sound_clip(&self, blocking: bool, clip: &str) -> Result<(), BusError> {
        self.inner.lock().commands.push(SimCommand::Clip {
            blocking,
            clip: clip.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;

    fn brick() -> (Arc<ManualClock>, SimBrick) {
        let clock = Arc::new(ManualClock::new(30));
        let brick = SimBrick::new(Method::Usb, clock.clone());
        brick.add_motor(MotorPort::A);
        (clock, brick)
    }

    fn running(power: i32) -> MotorState {
        MotorState {
            power,
            mode: MotorMode::MOTOR_ON,
            run_state: RunState::Running,
            ..MotorState::default()
        }
    }

    #[test]
    fn test_motor_integrates_power_over_time() {
        let (clock, brick) = brick();
        brick.write_output_state(MotorPort::A, &running(50)).unwrap();
        clock.advance(Duration::from_millis(200));
        // 50 power * 10 units/s * 0.2 s
        assert_eq!(brick.position(MotorPort::A), Some(100));
    }

    #[test]
    fn test_stalled_motor_does_not_move() {
        let (clock, brick) = brick();
        brick.set_stalled(MotorPort::A, true);
        brick.write_output_state(MotorPort::A, &running(100)).unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(brick.position(MotorPort::A), Some(0));
    }

    #[test]
    fn test_relative_reset_zeroes_block_count() {
        let (_clock, brick) = brick();
        brick.nudge(MotorPort::A, 250);
        brick.reset_motor_position(MotorPort::A, true).unwrap();
        brick.nudge(MotorPort::A, -20);
        let (_, tacho) = brick.read_output_state(MotorPort::A).unwrap();
        assert_eq!(tacho.tacho_count, 230);
        assert_eq!(tacho.block_tacho_count, Some(-20));
        assert_eq!(tacho.rotation_count, Some(230));
    }

    #[test]
    fn test_press_windows_follow_clock() {
        let (clock, brick) = brick();
        brick.add_input(
            SensorPort::S1,
            SimInput::Windows(vec![Duration::from_millis(100)..Duration::from_millis(300)]),
        );
        assert!(!brick.read_digital_input(SensorPort::S1).unwrap());
        clock.advance(Duration::from_millis(150));
        assert!(brick.read_digital_input(SensorPort::S1).unwrap());
        clock.advance(Duration::from_millis(200));
        assert!(!brick.read_digital_input(SensorPort::S1).unwrap());
    }

    #[test]
    fn test_limit_switch_trips_on_position() {
        let (_clock, brick) = brick();
        brick.add_input(
            SensorPort::S2,
            SimInput::Limit {
                port: MotorPort::A,
                position: -50,
                toward: -1,
            },
        );
        assert!(!brick.read_digital_input(SensorPort::S2).unwrap());
        brick.nudge(MotorPort::A, -60);
        assert!(brick.read_digital_input(SensorPort::S2).unwrap());
    }

    #[test]
    fn test_unknown_ports_are_errors() {
        let (_clock, brick) = brick();
        assert_eq!(
            brick.read_output_state(MotorPort::C).unwrap_err(),
            BusError::UnknownMotor(MotorPort::C)
        );
        assert_eq!(
            brick.read_digital_input(SensorPort::S4).unwrap_err(),
            BusError::UnknownSensor(SensorPort::S4)
        );
    }
}
