//! Camera bar homing and offset calibration.
//!
//! Homing drives the bar toward the camera stop switch and reads the switch
//! once per loop iteration:
//!
//! - a click reverses the homing direction and homes again,
//! - a hold of one second (tone) followed by a release aborts,
//! - a hold of two seconds means the bar rests on the switch: it is homed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ln3d_nxt::{
    Brick, DualMotors, InvertedMotor, MotorPort, PrecisionMotor, Scheduler, SensorPort, Switch,
    TurnOptions,
};
use tracing::{debug, info, warn};

use crate::error::CameraBarError;

/// Hold time that aborts homing once the switch is released.
pub const ABORT_HOLD_MS: u64 = 1000;
/// Hold time that marks the bar as homed.
pub const HOMED_HOLD_MS: u64 = 2000;
/// Turn away from the switch once homed.
pub const HOME_OVERSHOOT: i32 = 360;
/// Length of an [`CameraBar::up`] step.
pub const UP_STEP: i32 = 90;
/// Sound file played once homed.
pub const HOMED_CLIP: &str = "! Backup.rso";

/// Ganged camera bar motors: the second motor is mounted mirrored.
pub type BarMotors<B> = DualMotors<PrecisionMotor<B>, InvertedMotor<PrecisionMotor<B>>>;

/// Ports the camera bar is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarWiring {
    /// Leader motor.
    pub leader: MotorPort,
    /// Follower motor, mounted mirrored.
    pub follower: MotorPort,
    /// Camera stop switch.
    pub camera_stop: SensorPort,
}

impl Default for BarWiring {
    fn default() -> Self {
        Self {
            leader: MotorPort::B,
            follower: MotorPort::C,
            camera_stop: SensorPort::S1,
        }
    }
}

/// Tunables of the camera bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBarConfig {
    /// Drive power magnitude.
    pub power: i32,
    /// Sign of power that moves the bar away from home.
    pub up_direction: i32,
    /// Tacho units from the camera stop to the reference position.
    pub camera_stop_offset: i32,
    /// Motor to camera bar gear ratio.
    pub gear_ratio: i32,
    /// Direction reversals allowed within one [`CameraBar::home`].
    pub max_reversals: u32,
    /// How long calibration waits for the confirmation press.
    pub confirm_timeout: Duration,
}

impl Default for CameraBarConfig {
    fn default() -> Self {
        Self {
            power: 100,
            up_direction: -1,
            camera_stop_offset: 17320,
            gear_ratio: 120,
            max_reversals: 3,
            confirm_timeout: Duration::from_secs(120),
        }
    }
}

/// How a call to [`CameraBar::home`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingOutcome {
    /// The bar rests on the camera stop and was backed off it.
    Homed,
    /// The operator aborted with a one second hold.
    Aborted,
    /// The cancel flag was raised.
    Cancelled,
}

/// Result of one homing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Homed,
    Reverse,
    Abort,
    Cancelled,
}

fn raised(flag: &Option<Arc<AtomicBool>>) -> bool {
    flag.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Rotating camera bar driven by two ganged motors and homed on a switch.
pub struct CameraBar<B: Brick + ?Sized> {
    brick: Arc<B>,
    motors: BarMotors<B>,
    camera_stop: Switch<B>,
    scheduler: Arc<dyn Scheduler>,
    power: i32,
    up_direction: i32,
    camera_stop_offset: i32,
    gear_ratio: i32,
    max_reversals: u32,
    confirm_timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<B: Brick + ?Sized> CameraBar<B> {
    /// Wire up the bar and zero the motors' block counters.
    pub fn new(
        brick: Arc<B>,
        wiring: BarWiring,
        config: CameraBarConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, CameraBarError> {
        let leader = PrecisionMotor::new(Arc::clone(&brick), wiring.leader, Arc::clone(&scheduler));
        let follower = InvertedMotor::new(PrecisionMotor::new(
            Arc::clone(&brick),
            wiring.follower,
            Arc::clone(&scheduler),
        ));
        let mut motors = DualMotors::new(leader, follower, Arc::clone(&scheduler));
        motors.reset_position(true)?;
        let camera_stop = Switch::new(Arc::clone(&brick), wiring.camera_stop, Arc::clone(&scheduler));

        Ok(Self {
            brick,
            motors,
            camera_stop,
            scheduler,
            power: config.power.abs(),
            up_direction: config.up_direction.signum(),
            camera_stop_offset: config.camera_stop_offset,
            gear_ratio: config.gear_ratio,
            max_reversals: config.max_reversals,
            confirm_timeout: config.confirm_timeout,
            cancel: None,
        })
    }

    /// Poll `flag` in every loop; raising it stops the bar in an orderly way.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Signed power that moves the bar away from home.
    pub fn power(&self) -> i32 {
        self.power * self.up_direction
    }

    /// Set the power magnitude; the sign is ignored.
    pub fn set_power(&mut self, power: i32) {
        self.power = power.abs();
    }

    /// Sign of power that moves the bar away from home.
    pub fn up_direction(&self) -> i32 {
        self.up_direction
    }

    /// Swap which way is "up".
    pub fn invert_up_direction(&mut self) {
        self.up_direction = -self.up_direction;
    }

    /// Calibrated distance from the camera stop to the reference position.
    pub fn camera_stop_offset(&self) -> i32 {
        self.camera_stop_offset
    }

    /// The bar motors.
    pub fn motors(&mut self) -> &mut BarMotors<B> {
        &mut self.motors
    }

    /// Move the bar one step away from home.
    pub fn up(&mut self) -> Result<(), CameraBarError> {
        let power = self.power();
        let cancel = &self.cancel;
        self.motors
            .turn(power, UP_STEP, TurnOptions::default(), || raised(cancel))?;
        Ok(())
    }

    /// Brake, settle and idle both motors.
    pub fn stop(&mut self) -> Result<(), CameraBarError> {
        Ok(self.motors.stop()?)
    }

    /// Home the bar on the camera stop.
    ///
    /// If the bar is set up the wrong way round, click the camera stop to
    /// reverse the direction. Hold it until the tone (one second) and release
    /// to abort. Holding for two seconds means the bar is homed.
    ///
    /// # Errors
    ///
    /// [`CameraBarError::ReversalLimit`] after more than `max_reversals`
    /// direction changes.
    pub fn home(&mut self) -> Result<HomingOutcome, CameraBarError> {
        let mut reversals = 0;
        loop {
            match self.homing_pass()? {
                Pass::Reverse => {
                    reversals += 1;
                    if reversals > self.max_reversals {
                        warn!(reversals, "Too many homing reversals");
                        return Err(CameraBarError::ReversalLimit(self.max_reversals));
                    }
                    info!("Reverse homing direction.");
                    self.invert_up_direction();
                }
                Pass::Abort => {
                    info!("Abort homing procedure");
                    return Ok(HomingOutcome::Aborted);
                }
                Pass::Cancelled => {
                    info!("Homing cancelled");
                    return Ok(HomingOutcome::Cancelled);
                }
                Pass::Homed => {
                    self.brick.play_sound_clip(false, HOMED_CLIP)?;
                    let power = self.power();
                    let cancel = &self.cancel;
                    self.motors
                        .turn(power, HOME_OVERSHOOT, TurnOptions::default(), || raised(cancel))?;
                    if raised(&self.cancel) {
                        info!("Homing cancelled during backoff");
                        return Ok(HomingOutcome::Cancelled);
                    }
                    info!("Homed camera bar.");
                    return Ok(HomingOutcome::Homed);
                }
            }
        }
    }

    fn homing_pass(&mut self) -> Result<Pass, CameraBarError> {
        self.motors.run(-self.power())?;
        let mut mark = None;

        loop {
            if raised(&self.cancel) {
                self.motors.stop()?;
                return Ok(Pass::Cancelled);
            }

            {
                let mut switch = self.camera_stop.scope()?;
                if switch.is_pressed()? {
                    // Stop as soon as the switch closes.
                    mark = Some(Pass::Reverse);
                    self.motors.stop()?;
                }
                if switch.is_held(ABORT_HOLD_MS)? {
                    self.brick.emit_tone(440, 500)?;
                    mark = Some(Pass::Abort);
                }
                if switch.is_held(HOMED_HOLD_MS)? {
                    return Ok(Pass::Homed);
                }
                if let Some(pass) = mark {
                    if switch.is_released()? {
                        debug!(?pass, "Camera stop released");
                        return Ok(pass);
                    }
                }
            }

            self.scheduler.wait(None);
        }
    }

    /// Measure the offset between the camera stop and the reference position.
    ///
    /// 1. Home the bar.
    /// 2. Run it up, at most half a bar revolution or until the camera stop is pressed.
    /// 3. The operator centres the bar at 12 o'clock, turning the wheels by hand,
    ///    and presses the camera stop.
    /// 4. The position is zeroed there and the bar homes again; the distance
    ///    travelled becomes the new offset.
    pub fn calibrate_camera_offset(&mut self) -> Result<i32, CameraBarError> {
        info!("Calibrating camera bar rotation offset.");
        self.home_or_fail()?;

        info!("Rotating up till centre, at most half a camera bar rotation.");
        let power = self.power();
        let limit = 180 * self.gear_ratio;
        let cancel = &self.cancel;
        let camera_stop = &mut self.camera_stop;
        self.motors.turn(power, limit, TurnOptions::default(), || {
            raised(cancel)
                || camera_stop.is_pressed().unwrap_or_else(|err| {
                    warn!(%err, "Camera stop unreadable, stopping turn");
                    true
                })
        })?;
        self.check_cancelled()?;

        info!("Waiting for user input to continue.");
        let cancel = &self.cancel;
        let confirmed = self
            .camera_stop
            .wait_for_press_or(self.confirm_timeout, || raised(cancel))?;
        self.check_cancelled()?;
        if !confirmed {
            warn!(timeout = ?self.confirm_timeout, "No confirmation press, using current position");
        }
        info!("User calibrated centre. Returning home.");
        self.motors.reset_position(true)?;
        self.home_or_fail()?;

        let rotation = self.motors.get_tacho()?.block_tacho_count();
        info!(rotation, up_direction = self.up_direction, "Camera calibration results");
        self.camera_stop_offset = rotation;
        Ok(rotation)
    }

    fn check_cancelled(&self) -> Result<(), CameraBarError> {
        if raised(&self.cancel) {
            info!("Calibration cancelled");
            return Err(CameraBarError::NotHomed(HomingOutcome::Cancelled));
        }
        Ok(())
    }

    fn home_or_fail(&mut self) -> Result<(), CameraBarError> {
        match self.home()? {
            HomingOutcome::Homed => Ok(()),
            outcome => Err(CameraBarError::NotHomed(outcome)),
        }
    }
}
