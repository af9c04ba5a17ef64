//! Interface to the hardware collaborator that talks to the NXT brick.
//!
//! Packet framing, USB/Bluetooth transport and device discovery live behind
//! this trait. The crate ships [`SimBrick`](crate::sim::SimBrick) as an
//! in-process implementation.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::BusError;
use crate::traits::motor::{MotorState, TachoSnapshot};

/// Motor output port on the brick.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotorPort {
    /// Output port A.
    A,
    /// Output port B.
    B,
    /// Output port C.
    C,
}

impl fmt::Display for MotorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotorPort::A => "A",
            MotorPort::B => "B",
            MotorPort::C => "C",
        };
        f.write_str(name)
    }
}

/// Sensor input port on the brick.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorPort {
    /// Input port 1.
    S1,
    /// Input port 2.
    S2,
    /// Input port 3.
    S3,
    /// Input port 4.
    S4,
}

impl fmt::Display for SensorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorPort::S1 => "S1",
            SensorPort::S2 => "S2",
            SensorPort::S3 => "S3",
            SensorPort::S4 => "S4",
        };
        f.write_str(name)
    }
}

/// Communication channel used to reach the brick.
///
/// The channel latency decides how far from its target a motor may be when
/// the turn loop notices it, so it doubles as the stopping tolerance.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Direct USB cable.
    Usb,
    /// Direct Bluetooth link.
    Bluetooth,
    /// USB brick reached through an IP relay.
    IpUsb,
    /// Bluetooth brick reached through an IP relay.
    IpBluetooth,
    /// Anything else.
    #[default]
    Unknown,
}

impl Method {
    /// Stopping threshold in tacho units for this channel.
    pub const fn threshold(self) -> i32 {
        match self {
            Method::Usb => 5,
            Method::Bluetooth => 70,
            Method::IpUsb => 15,
            Method::IpBluetooth => 80,
            Method::Unknown => 30,
        }
    }
}

/// Operations the motor-control core needs from the brick.
///
/// Implementations use interior mutability so motors and sensors can share
/// one handle.
pub trait Brick: Send + Sync {
    /// Channel used to talk to the brick.
    fn method(&self) -> Method;

    /// Read the output state and tacho counters of a motor port.
    fn read_output_state(&self, port: MotorPort) -> Result<(MotorState, TachoSnapshot), BusError>;

    /// Write a new output state to a motor port.
    fn write_output_state(&self, port: MotorPort, state: &MotorState) -> Result<(), BusError>;

    /// Reset the block tacho counter (`relative`) or the program tacho counter.
    fn reset_motor_position(&self, port: MotorPort, relative: bool) -> Result<(), BusError>;

    /// Read a touch sensor.
    fn read_digital_input(&self, port: SensorPort) -> Result<bool, BusError>;

    /// Play a tone.
    fn emit_tone(&self, frequency: u16, duration_ms: u16) -> Result<(), BusError>;

    /// Play a sound file stored on the brick.
    fn play_sound_clip(&self, blocking: bool, clip: &str) -> Result<(), BusError>;
}
