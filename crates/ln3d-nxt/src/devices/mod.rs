//! Concrete motors: direct, inverted and a ganged pair.

pub mod dual;
pub mod inverted;
pub mod motor;
