//! Two geared-together motors driven as one unit but stopped independently.
//!
//! The pair shares one target projection, yet each side is tracked with its
//! own running flag. A side that arrives, or stalls past the timeout, is
//! stopped on its own while the other keeps going.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::bus::Method;
use crate::error::MotorError;
use crate::scheduler::Scheduler;
use crate::traits::motor::{
    FAR_POLL, MIN_TACHO_UNITS, Motor, MotorMode, MotorState, NEAR_WINDOW, RegulationMode, RunState,
    StateField, TachoSnapshot, TurnOptions,
};

/// Pause between braking and idling in [`DualMotors::stop`].
pub const BRAKE_SETTLE: Duration = Duration::from_millis(500);

/// One motor of a [`DualMotors`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The motor whose channel characteristics the pair reports.
    Leader,
    /// The second motor.
    Follower,
}

impl Side {
    /// Both sides, leader first.
    pub const BOTH: [Side; 2] = [Side::Leader, Side::Follower];

    const fn index(self) -> usize {
        match self {
            Side::Leader => 0,
            Side::Follower => 1,
        }
    }
}

/// Output states of both motors behind a single view.
///
/// Reads succeed only when both sides agree; writes go to both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DualMotorState {
    /// Leader state.
    pub leader: MotorState,
    /// Follower state.
    pub follower: MotorState,
}

impl DualMotorState {
    /// Pair two states.
    pub const fn new(leader: MotorState, follower: MotorState) -> Self {
        Self { leader, follower }
    }

    fn unified<T: PartialEq>(
        &self,
        field: StateField,
        read: impl Fn(&MotorState) -> T,
    ) -> Result<T, MotorError> {
        let leader = read(&self.leader);
        if leader != read(&self.follower) {
            return Err(MotorError::StateMismatch {
                field,
                leader: self.leader.raw(field),
                follower: self.follower.raw(field),
            });
        }
        Ok(leader)
    }

    /// Apply the same change to both sides.
    pub fn update(&mut self, write: impl Fn(&mut MotorState)) {
        write(&mut self.leader);
        write(&mut self.follower);
    }

    /// Integer value of `field` when both sides agree.
    pub fn get(&self, field: StateField) -> Result<i32, MotorError> {
        self.unified(field, |state| state.raw(field))
    }

    /// Check every field for agreement.
    pub fn validate(&self) -> Result<(), MotorError> {
        StateField::ALL
            .iter()
            .try_for_each(|&field| self.get(field).map(drop))
    }

    /// Shared power.
    pub fn power(&self) -> Result<i32, MotorError> {
        self.unified(StateField::Power, |state| state.power)
    }

    /// Set power on both sides.
    pub fn set_power(&mut self, power: i32) {
        self.update(|state| state.power = power);
    }

    /// Shared mode.
    pub fn mode(&self) -> Result<MotorMode, MotorError> {
        self.unified(StateField::Mode, |state| state.mode)
    }

    /// Set mode on both sides.
    pub fn set_mode(&mut self, mode: MotorMode) {
        self.update(|state| state.mode = mode);
    }

    /// Shared regulation mode.
    pub fn regulation_mode(&self) -> Result<RegulationMode, MotorError> {
        self.unified(StateField::RegulationMode, |state| state.regulation_mode)
    }

    /// Set regulation mode on both sides.
    pub fn set_regulation_mode(&mut self, regulation_mode: RegulationMode) {
        self.update(|state| state.regulation_mode = regulation_mode);
    }

    /// Shared turn ratio.
    pub fn turn_ratio(&self) -> Result<i32, MotorError> {
        self.unified(StateField::TurnRatio, |state| state.turn_ratio)
    }

    /// Set turn ratio on both sides.
    pub fn set_turn_ratio(&mut self, turn_ratio: i32) {
        self.update(|state| state.turn_ratio = turn_ratio);
    }

    /// Shared run state.
    pub fn run_state(&self) -> Result<RunState, MotorError> {
        self.unified(StateField::RunState, |state| state.run_state)
    }

    /// Set run state on both sides.
    pub fn set_run_state(&mut self, run_state: RunState) {
        self.update(|state| state.run_state = run_state);
    }

    /// Shared tacho limit.
    pub fn tacho_limit(&self) -> Result<u32, MotorError> {
        self.unified(StateField::TachoLimit, |state| state.tacho_limit)
    }

    /// Set tacho limit on both sides.
    pub fn set_tacho_limit(&mut self, tacho_limit: u32) {
        self.update(|state| state.tacho_limit = tacho_limit);
    }
}

/// Tacho snapshots of both motors.
///
/// Composite counters are truncated averages of the two sides; missing
/// counters count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DualTacho {
    /// Leader snapshot.
    pub leader: TachoSnapshot,
    /// Follower snapshot.
    pub follower: TachoSnapshot,
}

fn average(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

impl DualTacho {
    /// Pair two snapshots.
    pub const fn new(leader: TachoSnapshot, follower: TachoSnapshot) -> Self {
        Self { leader, follower }
    }

    /// Snapshot of one side.
    pub fn side(&self, side: Side) -> &TachoSnapshot {
        match side {
            Side::Leader => &self.leader,
            Side::Follower => &self.follower,
        }
    }

    /// Average tacho count.
    pub fn tacho_count(&self) -> i32 {
        average(self.leader.tacho_count, self.follower.tacho_count)
    }

    /// Average block tacho count.
    pub fn block_tacho_count(&self) -> i32 {
        average(
            self.leader.block_tacho_count.unwrap_or(0),
            self.follower.block_tacho_count.unwrap_or(0),
        )
    }

    /// Average rotation count.
    pub fn rotation_count(&self) -> i32 {
        average(
            self.leader.rotation_count.unwrap_or(0),
            self.follower.rotation_count.unwrap_or(0),
        )
    }

    /// Projected snapshots after each side moves `tacho_limit` in `direction`.
    ///
    /// Each side is projected from its own count, not from the average.
    pub fn get_target(&self, tacho_limit: i32, direction: i32) -> Result<Self, MotorError> {
        Ok(Self {
            leader: self.leader.get_target(tacho_limit, direction)?,
            follower: self.follower.get_target(tacho_limit, direction)?,
        })
    }

    /// Past `target` in `direction`: one side when `side` is given, the
    /// average otherwise.
    pub fn is_greater(&self, target: &Self, direction: i32, side: Option<Side>) -> bool {
        match side {
            Some(side) => self.side(side).is_greater(target.side(side), direction),
            None => i64::from(direction) * (i64::from(self.tacho_count()) - i64::from(target.tacho_count())) > 0,
        }
    }

    /// Closer than `threshold` to `target`: one side when `side` is given,
    /// the average otherwise.
    pub fn is_near(&self, target: &Self, threshold: i32, side: Option<Side>) -> bool {
        match side {
            Some(side) => self.side(side).is_near(target.side(side), threshold),
            None => (i64::from(target.tacho_count()) - i64::from(self.tacho_count())).abs() < i64::from(threshold),
        }
    }
}

/// Ganged leader/follower pair.
pub struct DualMotors<L: Motor, F: Motor> {
    leader: L,
    follower: F,
    scheduler: Arc<dyn Scheduler>,
}

impl<L: Motor, F: Motor> DualMotors<L, F> {
    /// Gang `leader` and `follower`, timed by `scheduler`.
    pub fn new(leader: L, follower: F, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            leader,
            follower,
            scheduler,
        }
    }

    /// Channel of the leader.
    pub fn method(&self) -> Method {
        self.leader.method()
    }

    /// Stopping tolerance for the leader's channel.
    pub fn threshold(&self) -> i32 {
        self.leader.threshold()
    }

    /// Reset both position counters.
    pub fn reset_position(&mut self, relative: bool) -> Result<(), MotorError> {
        self.leader.reset_position(relative)?;
        self.follower.reset_position(relative)
    }

    /// Fresh drive states of both sides.
    pub fn new_state(&mut self) -> Result<DualMotorState, MotorError> {
        Ok(DualMotorState::new(
            self.leader.new_state()?,
            self.follower.new_state()?,
        ))
    }

    /// Write both sides.
    pub fn set_state(&mut self, state: &DualMotorState) -> Result<(), MotorError> {
        self.leader.set_state(state.leader)?;
        self.follower.set_state(state.follower)
    }

    /// Run both motors forever with speed regulation.
    ///
    /// Always follow up with [`DualMotors::idle`] or [`DualMotors::stop`];
    /// the motors misbehave if left running.
    pub fn run(&mut self, power: i32) -> Result<(), MotorError> {
        self.leader.run(power, true)?;
        self.follower.run(power, true)
    }

    /// Brake both motors.
    pub fn brake(&mut self) -> Result<(), MotorError> {
        self.leader.brake()?;
        self.follower.brake()
    }

    /// Idle both motors.
    pub fn idle(&mut self) -> Result<(), MotorError> {
        self.leader.idle()?;
        self.follower.idle()
    }

    /// Brake, let the brake settle, then idle.
    pub fn stop(&mut self) -> Result<(), MotorError> {
        self.brake()?;
        self.scheduler.wait(Some(BRAKE_SETTLE));
        self.idle()
    }

    /// Snapshots of both sides.
    pub fn get_tacho(&mut self) -> Result<DualTacho, MotorError> {
        Ok(DualTacho::new(
            self.leader.get_tacho()?,
            self.follower.get_tacho()?,
        ))
    }

    /// Blocked check for one side, or for either side when `side` is `None`.
    pub fn is_blocked(
        &self,
        tacho: &DualTacho,
        last_tacho: &DualTacho,
        direction: i32,
        side: Option<Side>,
    ) -> bool {
        match side {
            Some(Side::Leader) => self.leader.is_blocked(&tacho.leader, &last_tacho.leader, direction),
            Some(Side::Follower) => {
                self.follower
                    .is_blocked(&tacho.follower, &last_tacho.follower, direction)
            }
            None => {
                self.is_blocked(tacho, last_tacho, direction, Some(Side::Leader))
                    || self.is_blocked(tacho, last_tacho, direction, Some(Side::Follower))
            }
        }
    }

    /// Mean of both sides' estimates. Not accurate.
    pub fn eta(&self, tacho: &DualTacho, target: &DualTacho, power: i32) -> Duration {
        let leader = self.leader.eta(&tacho.leader, &target.leader, power);
        let follower = self.follower.eta(&tacho.follower, &target.follower, power);
        (leader + follower) / 2
    }

    fn stop_side(&mut self, side: Side, brake: bool) -> Result<(), MotorError> {
        match (side, brake) {
            (Side::Leader, true) => self.leader.brake(),
            (Side::Leader, false) => self.leader.idle(),
            (Side::Follower, true) => self.follower.brake(),
            (Side::Follower, false) => self.follower.idle(),
        }
    }

    /// Turn both motors `tacho_units` in the direction of `power`.
    ///
    /// Each side stops on its own once it is within threshold of, or past,
    /// its own target. After `options.timeout` without progress, every side
    /// that is still blocked is stopped where it is instead of failing the
    /// whole turn. Sides still running when `stop` fires are stopped too,
    /// and with `options.brake` the pair finishes with [`DualMotors::stop`].
    ///
    /// # Errors
    ///
    /// [`MotorError::InvalidArgument`] for negative `tacho_units` or zero
    /// `power`. A stalled side is never reported as
    /// [`MotorError::Blocked`].
    pub fn turn(
        &mut self,
        power: i32,
        tacho_units: i32,
        options: TurnOptions,
        mut stop: impl FnMut() -> bool,
    ) -> Result<(), MotorError> {
        if tacho_units < 0 {
            return Err(MotorError::InvalidArgument("tacho_units must be non-negative"));
        }
        let direction = power.signum();
        if direction == 0 {
            return Err(MotorError::InvalidArgument("power must be non-zero"));
        }
        let tacho_limit = tacho_units.max(MIN_TACHO_UNITS);

        let tacho = self.get_tacho()?;
        let target = tacho.get_target(tacho_limit, direction)?;
        let mut state = self.new_state()?;
        state.set_power(power);
        self.set_state(&state)?;
        debug!(
            power,
            leader_target = target.leader.tacho_count,
            follower_target = target.follower.tacho_count,
            "Dual turn started"
        );

        let mut running = [true, true];
        let result = self.track_turn(tacho, &target, direction, options, &mut running, &mut stop);

        let mut cleanup = Ok(());
        for side in Side::BOTH {
            if running[side.index()] {
                cleanup = cleanup.and(self.stop_side(side, options.brake));
            }
        }
        if options.brake {
            cleanup = cleanup.and(self.stop());
        }
        result.and(cleanup)
    }

    fn track_turn(
        &mut self,
        mut tacho: DualTacho,
        target: &DualTacho,
        direction: i32,
        options: TurnOptions,
        running: &mut [bool; 2],
        stop: &mut impl FnMut() -> bool,
    ) -> Result<(), MotorError> {
        let clock = Arc::clone(&self.scheduler);
        let threshold = self.threshold();
        let mut blocked = false;
        let mut current_time = clock.now();
        let mut last_time = current_time;
        let mut last_tacho = tacho;

        while running.iter().any(|&r| r) && !stop() {
            if tacho.is_near(target, NEAR_WINDOW, None) {
                clock.wait(None);
            } else {
                clock.wait(Some(FAR_POLL));
            }

            if !blocked {
                last_tacho = tacho;
                last_time = current_time;
                current_time = clock.now();
            }

            tacho = self.get_tacho()?;
            // A side that has already stopped does not hold the reference back.
            blocked = Side::BOTH.iter().any(|&side| {
                running[side.index()] && self.is_blocked(&tacho, &last_tacho, direction, Some(side))
            });
            let timed_out = blocked && clock.now().saturating_sub(last_time) > options.timeout;
            trace!(
                leader = tacho.leader.tacho_count,
                follower = tacho.follower.tacho_count,
                blocked,
                timed_out,
                "Dual turn tick"
            );

            for side in Side::BOTH {
                if !running[side.index()] {
                    continue;
                }
                let snapshot = tacho.side(side).tacho_count;
                if tacho.is_near(target, threshold, Some(side))
                    || tacho.is_greater(target, direction, Some(side))
                {
                    debug!(?side, tacho = snapshot, "Side reached target");
                    self.stop_side(side, options.brake)?;
                    running[side.index()] = false;
                } else if timed_out && self.is_blocked(&tacho, &last_tacho, direction, Some(side)) {
                    warn!(
                        ?side,
                        tacho = snapshot,
                        target = target.side(side).tacho_count,
                        "Side stalled short of target, stopping it"
                    );
                    self.stop_side(side, options.brake)?;
                    running[side.index()] = false;
                }
            }
        }
        Ok(())
    }
}
