//! Server connection profile and client share links.

pub mod link;
pub mod server;
