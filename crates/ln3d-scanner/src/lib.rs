#![warn(missing_docs)]
#![doc = "Camera bar control for the LN3D scanner."]
#![doc = ""]
#![doc = "Homes the rotating camera bar against its limit switch and calibrates"]
#![doc = "the offset between the switch and the bar's reference position."]

pub mod camera_bar;
pub mod error;

pub use camera_bar::{BarWiring, CameraBar, CameraBarConfig, HomingOutcome};
pub use error::CameraBarError;
