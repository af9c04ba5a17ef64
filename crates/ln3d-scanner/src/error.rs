//! Error types for camera bar operations.

use ln3d_nxt::{BusError, MotorError, SwitchError};

use crate::camera_bar::HomingOutcome;

/// Errors that can occur while homing or calibrating the camera bar.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CameraBarError {
    /// Motor command failed.
    #[error("motor error: {0}")]
    Motor(#[from] MotorError),
    /// Camera stop switch failed.
    #[error("camera stop error: {0}")]
    Switch(#[from] SwitchError),
    /// Brick failed outside a motor or switch call.
    #[error("brick error: {0}")]
    Bus(#[from] BusError),
    /// The homing direction was reversed more often than allowed.
    #[error("homing reversed more than {0} times")]
    ReversalLimit(u32),
    /// Calibration needs a homed bar.
    #[error("calibration interrupted, homing ended with {0:?}")]
    NotHomed(HomingOutcome),
}
