//! Proxywarden error types.

use thiserror::Error;

/// Errors that can occur while managing proxy clients.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input from the administrative layer was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No client with this name exists.
    #[error("No such client: {name}")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },

    /// A client with this name already exists (active or suspended).
    #[error("Client already exists: {name}")]
    DuplicateName {
        /// The name that is already taken.
        name: String,
    },

    /// Registry file could not be read, parsed, or written.
    #[error("Registry I/O error: {0}")]
    RegistryIO(String),

    /// Live proxy document could not be read or parsed.
    #[error("Proxy config read error: {0}")]
    ConfigRead(String),

    /// Live proxy document could not be written.
    #[error("Proxy config write error: {0}")]
    ConfigWrite(String),

    /// The proxy did not accept the reload signal.
    ///
    /// The config mutation itself was kept; the live proxy may be stale.
    #[error("Proxy reload failed: {0}")]
    Reload(String),

    /// Usage counters could not be queried.
    #[error("Stats query failed: {0}")]
    StatsQuery(String),

    /// An external command could not be spawned or timed out.
    #[error("Command failed: {0}")]
    Command(String),

    /// Server profile could not be read or is incomplete.
    #[error("Server profile error: {0}")]
    ProfileIO(String),
}
