//! Boundary to the running proxy: live config, stats, external commands.

pub mod adapter;
pub mod command;
pub mod document;
pub mod stats;
