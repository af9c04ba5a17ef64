//! Motor driven directly through one brick output port.

use std::sync::Arc;

use crate::bus::{Brick, Method, MotorPort};
use crate::error::MotorError;
use crate::scheduler::Scheduler;
use crate::traits::motor::{Motor, MotorState, TachoSnapshot};

/// Motor wired directly to a brick output port.
///
/// Every read goes to the brick; nothing is cached between calls.
pub struct PrecisionMotor<B: Brick + ?Sized> {
    brick: Arc<B>,
    port: MotorPort,
    scheduler: Arc<dyn Scheduler>,
}

impl<B: Brick + ?Sized> PrecisionMotor<B> {
    /// Create a motor on `port` timed by `scheduler`.
    pub fn new(brick: Arc<B>, port: MotorPort, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            brick,
            port,
            scheduler,
        }
    }
}

impl<B: Brick + ?Sized> Motor for PrecisionMotor<B> {
    fn port(&self) -> MotorPort {
        self.port
    }

    fn method(&self) -> Method {
        self.brick.method()
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    fn read_state(&mut self) -> Result<(MotorState, TachoSnapshot), MotorError> {
        Ok(self.brick.read_output_state(self.port)?)
    }

    fn set_state(&mut self, state: MotorState) -> Result<(), MotorError> {
        Ok(self.brick.write_output_state(self.port, &state)?)
    }

    fn reset_position(&mut self, relative: bool) -> Result<(), MotorError> {
        Ok(self.brick.reset_motor_position(self.port, relative)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scheduler::ManualClock;
    use crate::sim::SimBrick;
    use crate::traits::motor::{MotorMode, RunState, TurnOptions};

    fn setup(method: Method) -> (Arc<ManualClock>, Arc<SimBrick>, PrecisionMotor<SimBrick>) {
        let clock = Arc::new(ManualClock::new(30));
        let brick = Arc::new(SimBrick::new(method, clock.clone()));
        brick.add_motor(MotorPort::A);
        let motor = PrecisionMotor::new(brick.clone(), MotorPort::A, clock.clone());
        (clock, brick, motor)
    }

    #[test]
    fn test_turn_reaches_target_and_brakes_once() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        motor.turn(50, 90, TurnOptions::default(), || false).unwrap();

        let position = brick.position(MotorPort::A).unwrap();
        assert!(position >= 90 - Method::Usb.threshold(), "stopped at {position}");
        assert_eq!(brick.brake_count(MotorPort::A), 1);
        assert_eq!(brick.idle_count(MotorPort::A), 0);

        let last = *brick.writes_to(MotorPort::A).last().unwrap();
        assert!(last.mode.contains(MotorMode::BRAKE));
        assert_eq!(last.power, 0);
    }

    #[test]
    fn test_turn_backwards_with_idle() {
        let (_clock, brick, mut motor) = setup(Method::Bluetooth);
        let options = TurnOptions {
            brake: false,
            ..TurnOptions::default()
        };
        motor.turn(-80, 400, options, || false).unwrap();

        assert!(brick.position(MotorPort::A).unwrap() <= -400 + Method::Bluetooth.threshold());
        assert_eq!(brick.idle_count(MotorPort::A), 1);
        assert_eq!(brick.brake_count(MotorPort::A), 0);
    }

    #[test]
    fn test_turn_blocked_raises_after_braking() {
        let (clock, brick, mut motor) = setup(Method::Usb);
        brick.set_stalled(MotorPort::A, true);

        let result = motor.turn(50, 90, TurnOptions::default(), || false);

        assert_eq!(result, Err(MotorError::Blocked { tacho: 0, target: 90 }));
        assert_eq!(brick.brake_count(MotorPort::A), 1);
        assert!(clock.now() > Duration::from_secs(1));
    }

    #[test]
    fn test_turn_stalled_within_threshold_succeeds() {
        let (_clock, brick, mut motor) = setup(Method::Bluetooth);
        brick.set_stalled(MotorPort::A, true);
        // 40 units is inside the Bluetooth tolerance of 70.
        motor.turn(50, 40, TurnOptions::default(), || false).unwrap();
        assert_eq!(brick.brake_count(MotorPort::A), 1);
        assert_eq!(brick.position(MotorPort::A), Some(0));
    }

    #[test]
    fn test_turn_stops_on_predicate() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        let mut polls = 0;
        motor
            .turn(100, 5000, TurnOptions::default(), || {
                polls += 1;
                polls > 3
            })
            .unwrap();
        assert!(brick.position(MotorPort::A).unwrap() < 5000);
        assert_eq!(brick.brake_count(MotorPort::A), 1);
    }

    #[test]
    fn test_turn_rejects_bad_arguments_without_io() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        assert!(matches!(
            motor.turn(50, -1, TurnOptions::default(), || false),
            Err(MotorError::InvalidArgument(_))
        ));
        assert!(matches!(
            motor.turn(0, 90, TurnOptions::default(), || false),
            Err(MotorError::InvalidArgument(_))
        ));
        assert!(brick.commands().is_empty());
    }

    #[test]
    fn test_turn_rejects_target_beyond_counter_range() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        brick.nudge(MotorPort::A, 10);
        assert!(matches!(
            motor.turn(50, i32::MAX, TurnOptions::default(), || false),
            Err(MotorError::InvalidArgument(_))
        ));
        assert!(brick.writes_to(MotorPort::A).is_empty());
    }

    #[test]
    fn test_turn_clamps_to_minimum_units() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        let options = TurnOptions {
            emulate: false,
            ..TurnOptions::default()
        };
        motor.turn(30, 0, options, || false).unwrap();
        let first = brick.writes_to(MotorPort::A)[0];
        assert_eq!(first.tacho_limit, 10);
        assert_eq!(first.power, 30);
        assert_eq!(first.run_state, RunState::Running);
    }

    #[test]
    fn test_run_then_idle_states() {
        let (_clock, brick, mut motor) = setup(Method::Usb);
        motor.run(75, true).unwrap();
        motor.idle().unwrap();
        let writes = brick.writes_to(MotorPort::A);
        assert_eq!(writes[0].power, 75);
        assert!(writes[0].mode.contains(MotorMode::REGULATED));
        assert_eq!(writes[1].mode, MotorMode::IDLE);
        assert_eq!(writes[1].run_state, RunState::Idle);
    }

    #[test]
    fn test_eta_estimate() {
        let (_clock, _brick, motor) = setup(Method::Usb);
        let eta = motor.eta(&TachoSnapshot::new(0), &TachoSnapshot::new(900), 100);
        assert_eq!(eta, Duration::from_secs(1));
    }
}
