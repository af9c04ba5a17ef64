//! Sensors attached to the brick's input ports.

pub mod switch;
