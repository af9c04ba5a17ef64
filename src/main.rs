mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, ensure};
use clap::{Parser, Subcommand};
use ln3d_nxt::sim::{SimBrick, SimInput};
use ln3d_nxt::{Brick, ManualClock, Scheduler, Ticker};
use ln3d_scanner::{CameraBar, HomingOutcome};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(version, about = "Camera bar control for the LN3D scanner")]
struct Opts {
    /// Configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Run the simulation on a virtual clock instead of wall time
    #[arg(long)]
    virtual_clock: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Home the camera bar on the camera stop
    Home,
    /// Move the camera bar one step away from home
    Up,
    /// Measure the camera stop offset
    Calibrate,
    /// Brake and release the bar motors
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let opts = Opts::parse();
    let settings = config::load_config(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    let bar_settings = &settings.camera_bar;
    ensure!(bar_settings.up_direction != 0, "camera_bar.up_direction must be 1 or -1");
    ensure!(bar_settings.frequency > 0, "camera_bar.frequency must be positive");

    let scheduler: Arc<dyn Scheduler> = if opts.virtual_clock {
        Arc::new(ManualClock::new(bar_settings.frequency))
    } else {
        Arc::new(Ticker::new(bar_settings.frequency))
    };

    let wiring = bar_settings.wiring();
    let brick = SimBrick::new(settings.brick.method, Arc::clone(&scheduler)).with_speed(settings.brick.speed);
    brick.add_motor(wiring.leader);
    brick.add_motor(wiring.follower);
    // Homing drives the leader against the up direction.
    let toward = -bar_settings.up_direction.signum();
    brick.add_input(
        wiring.camera_stop,
        SimInput::Limit {
            port: wiring.leader,
            position: toward * settings.brick.switch_position,
            toward,
        },
    );
    info!(method = ?brick.method(), ?wiring, "Simulated brick ready");

    let cancel = Arc::new(AtomicBool::new(false));
    let mut bar = CameraBar::new(Arc::new(brick), wiring, bar_settings.bar_config(), scheduler)?
        .with_cancel(Arc::clone(&cancel));

    let command = opts.command;
    let mut session = tokio::task::spawn_blocking(move || run_session(&mut bar, command));

    let joined = tokio::select! {
        joined = &mut session => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl-C received, stopping camera bar.");
            cancel.store(true, Ordering::Relaxed);
            session.await
        }
    };
    joined.context("camera bar session panicked")?
}

fn run_session<B: Brick + ?Sized>(bar: &mut CameraBar<B>, command: Command) -> anyhow::Result<()> {
    info!(?command, "Session started");
    let result = match command {
        Command::Home => bar.home().map(|outcome| match outcome {
            HomingOutcome::Homed => info!("Camera bar homed."),
            outcome => warn!(?outcome, "Camera bar not homed"),
        }),
        Command::Up => bar.up(),
        Command::Calibrate => bar.calibrate_camera_offset().map(|offset| {
            info!(offset, "Set camera_bar.camera_stop_offset to keep this calibration.")
        }),
        Command::Stop => Ok(()),
    };

    // Leave the motors released whatever happened above.
    let stopped = bar.stop();
    result?;
    stopped?;
    info!("Session finished.");
    Ok(())
}
