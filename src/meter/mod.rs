//! Usage metering.

pub mod usage;
