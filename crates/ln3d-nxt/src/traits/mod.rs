//! Capability traits and the data they exchange.

pub mod motor;
