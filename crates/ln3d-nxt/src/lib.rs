#![warn(missing_docs)]
#![doc = "Motor, touch-switch and timing primitives for an NXT brick."]
#![doc = ""]
#![doc = "This crate provides the precision turn loop with blocked-motion detection,"]
#![doc = "an inverted motor decorator, ganged dual-motor control and a debounced,"]
#![doc = "duration-aware limit switch. Hardware access goes through the [`Brick`] trait."]

pub mod bus;
pub mod devices;
pub mod error;
pub mod scheduler;
pub mod sensors;
pub mod sim;
pub mod traits;

pub use bus::{Brick, Method, MotorPort, SensorPort};
pub use devices::dual::{DualMotorState, DualMotors, DualTacho, Side};
pub use devices::inverted::InvertedMotor;
pub use devices::motor::PrecisionMotor;
pub use error::{BusError, MotorError, SwitchError};
pub use scheduler::{ManualClock, Scheduler, Ticker};
pub use sensors::switch::{PressQuery, Switch, SwitchScope};
pub use traits::motor::{
    Motor, MotorMode, MotorState, RegulationMode, RunState, StateField, TachoSnapshot, TurnOptions,
};
