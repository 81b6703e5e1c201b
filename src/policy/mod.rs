//! Suspension policy.

pub mod quota;
