//! # Proxywarden
//!
//! **Client quota and lifecycle engine for Xray/Reality proxy servers.**
//!
//! Proxywarden keeps two stores consistent: a durable client registry
//! (name, credential, traffic quota, expiry) and the proxy's live config
//! (who may connect). A periodic sweep reads traffic counters from the
//! proxy's stats API, evaluates each client's quota and expiry, and
//! removes violators from the live config before recording the suspension.
//!
//! ## Features
//!
//! - **Fail-closed suspension**: live config is updated before the registry
//! - **Monotonic usage**: a failed or reset counter never lowers cached usage
//! - **Concurrent-edit guard**: live config rewrites abort if the file changed mid-update
//! - **Atomic persistence**: every write goes through temp file + rename
//! - **Legacy formats**: reads the `clients.json` and `vpn_config.json` written by older tooling
//!
//! ## Quickstart
//!
//! ```no_run
//! use proxywarden::{ClientManager, WardenConfig};
//!
//! # async fn run() -> Result<(), proxywarden::WardenError> {
//! let config = WardenConfig::from_env()?;
//! let manager = ClientManager::new(config)?;
//!
//! let alice = manager.provision("alice", Some(10), Some(30)).await?;
//! println!("{}", manager.connection_link(&alice.value.name)?);
//!
//! let report = manager.sweep().await?;
//! for (name, reason) in &report.suspended {
//!     println!("suspended {}: {}", name, reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See [`WardenConfig`] for the full list; the common knobs are
//! `PROXYWARDEN_DATA_DIR`, `PROXYWARDEN_XRAY_CONFIG`, `PROXYWARDEN_XRAY_BIN`,
//! `PROXYWARDEN_STATS_SERVER` and `PROXYWARDEN_ADMIN_IDS`.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;
mod persist;

// Durable registry
pub mod registry;

// Proxy boundary
pub mod proxy;

// Metering layer
pub mod meter;

// Policy layer
pub mod policy;

// Server profile and share links
pub mod profile;

// Front-end dialogue state
pub mod session;

// Manager (main public API)
pub mod manager;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::WardenConfig;
pub use errors::WardenError;
pub use manager::{Applied, ClientManager, ClientStatusView, ServerSummary, SweepReport};
pub use meter::usage::Usage;
pub use policy::quota::Verdict;
pub use proxy::adapter::RoutingParameter;
pub use proxy::command::{CommandOutput, CommandRunner};
pub use proxy::stats::StatsProvider;
pub use registry::model::{Client, DisabledReason};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
