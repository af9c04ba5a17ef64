//! Motor wrapper for a mirrored mounting.

use std::sync::Arc;

use crate::bus::{Method, MotorPort};
use crate::error::MotorError;
use crate::scheduler::Scheduler;
use crate::traits::motor::{Motor, MotorState, TachoSnapshot};

/// Motor mounted mirror-wise.
///
/// Power is negated on the way out and power and tacho counters on the way
/// back, so callers see the same frame of reference as a normal motor.
pub struct InvertedMotor<M: Motor> {
    inner: M,
}

impl<M: Motor> InvertedMotor<M> {
    /// Wrap `inner`.
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: Motor> Motor for InvertedMotor<M> {
    fn port(&self) -> MotorPort {
        self.inner.port()
    }

    fn method(&self) -> Method {
        self.inner.method()
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.scheduler()
    }

    fn read_state(&mut self) -> Result<(MotorState, TachoSnapshot), MotorError> {
        let (mut state, tacho) = self.inner.read_state()?;
        state.power = -state.power;
        Ok((state, tacho.inverted()))
    }

    fn set_state(&mut self, mut state: MotorState) -> Result<(), MotorError> {
        state.power = -state.power;
        self.inner.set_state(state)
    }

    fn reset_position(&mut self, relative: bool) -> Result<(), MotorError> {
        self.inner.reset_position(relative)
    }
}
