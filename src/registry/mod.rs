//! Durable client registry: the record of identity and policy.

pub mod model;
pub mod store;
