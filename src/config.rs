use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, File, FileFormat};
use ln3d_nxt::{Method, MotorPort, SensorPort};
use ln3d_scanner::{BarWiring, CameraBarConfig};
use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Settings of the simulated brick.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrickSettings {
    pub method: Method,
    /// Tacho units per second per unit of power.
    pub speed: f64,
    /// Leader position where the simulated camera stop closes.
    pub switch_position: i32,
}

impl Default for BrickSettings {
    fn default() -> Self {
        Self {
            method: Method::Usb,
            speed: ln3d_nxt::sim::DEFAULT_SPEED,
            switch_position: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraBarSettings {
    pub leader: MotorPort,
    pub follower: MotorPort,
    pub camera_stop: SensorPort,
    pub power: i32,
    pub up_direction: i32,
    pub camera_stop_offset: i32,
    pub gear_ratio: i32,
    /// Control loop frequency in Hz.
    pub frequency: u32,
    pub max_reversals: u32,
    pub confirm_timeout_secs: u64,
}

impl Default for CameraBarSettings {
    fn default() -> Self {
        let wiring = BarWiring::default();
        let bar = CameraBarConfig::default();
        Self {
            leader: wiring.leader,
            follower: wiring.follower,
            camera_stop: wiring.camera_stop,
            power: bar.power,
            up_direction: bar.up_direction,
            camera_stop_offset: bar.camera_stop_offset,
            gear_ratio: bar.gear_ratio,
            frequency: 30,
            max_reversals: bar.max_reversals,
            confirm_timeout_secs: bar.confirm_timeout.as_secs(),
        }
    }
}

impl CameraBarSettings {
    pub fn wiring(&self) -> BarWiring {
        BarWiring {
            leader: self.leader,
            follower: self.follower,
            camera_stop: self.camera_stop,
        }
    }

    pub fn bar_config(&self) -> CameraBarConfig {
        CameraBarConfig {
            power: self.power,
            up_direction: self.up_direction,
            camera_stop_offset: self.camera_stop_offset,
            gear_ratio: self.gear_ratio,
            max_reversals: self.max_reversals,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub brick: BrickSettings,
    pub camera_bar: CameraBarSettings,
}

pub fn load_config(path: &Path) -> Result<ScannerConfig, ConfigError> {
    info!("Attempting to load configuration from {}", path.display());

    let settings = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(true))
        .build()
        .and_then(|config| config.try_deserialize::<ScannerConfig>());

    match settings {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", config);
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}
