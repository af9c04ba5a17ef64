//! This module defines the error types used by the `ln3d-nxt` crate.

use crate::bus::{MotorPort, SensorPort};
use crate::traits::motor::StateField;

/// Errors raised by the hardware collaborator behind the [`Brick`](crate::Brick) trait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// No motor is wired to the requested output port.
    #[error("no motor on output port {0}")]
    UnknownMotor(MotorPort),
    /// No sensor is wired to the requested input port.
    #[error("no sensor on input port {0}")]
    UnknownSensor(SensorPort),
    /// The brick stopped answering.
    #[error("brick disconnected: {0}")]
    Disconnected(String),
}

/// Error type for motor operations.
///
/// Argument checks fail before any hardware I/O happens. A blocked turn is
/// only reported after the motor has been braked or idled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MotorError {
    /// An argument was outside its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Leader and follower disagree on a field read through the unified view.
    #[error("state mismatch on {field:?}: leader {leader}, follower {follower}")]
    StateMismatch {
        /// Field that was read.
        field: StateField,
        /// Leader value.
        leader: i32,
        /// Follower value.
        follower: i32,
    },
    /// The motor stopped making progress and is not close enough to its target.
    #[error("motor blocked at tacho {tacho}, target {target}")]
    Blocked {
        /// Tacho count when the timeout expired.
        tacho: i32,
        /// Projected target tacho count.
        target: i32,
    },
    /// Underlying bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Error type for switch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwitchError {
    /// A scoped read was opened while another one is active.
    #[error("switch read scope is already active")]
    ScopeActive,
    /// A scoped read was closed while none is active.
    #[error("switch read scope is already closed")]
    ScopeClosed,
    /// Underlying bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}
