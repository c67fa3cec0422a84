//! Configuration constants for page geometry, node layout, and cache sizing.

pub mod constants;

pub use constants::*;
