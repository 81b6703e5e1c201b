//! Proxywarden configuration.

use crate::WardenError;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the live Xray document.
pub const DEFAULT_XRAY_CONFIG: &str = "/usr/local/etc/xray/config.json";

/// Default address of the Xray stats API listener.
pub const DEFAULT_STATS_SERVER: &str = "127.0.0.1:62789";

/// Upper bound for any external command invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for a [`ClientManager`](crate::ClientManager).
///
/// Everything the engine touches on disk or on the host is named here;
/// the engine keeps no process-wide state of its own.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// Client registry document (`clients.json`).
    pub registry_path: PathBuf,

    /// Live Xray config document.
    pub proxy_config_path: PathBuf,

    /// Server connection profile (`vpn_config.json`).
    pub profile_path: PathBuf,

    /// Xray binary used for stats queries.
    pub xray_binary: String,

    /// Address of the Xray stats API (`host:port`).
    pub stats_server: String,

    /// systemd unit name of the proxy.
    pub service_name: String,

    /// systemctl binary used for reload/restart.
    pub systemctl_binary: String,

    /// Index of the inbound that carries the managed clients.
    pub inbound_index: usize,

    /// Flow mode written into each client entry.
    pub client_flow: String,

    /// Camouflage destination used when the server name is cleared.
    pub fallback_destination: String,

    /// Timeout applied to every external command.
    pub command_timeout: Duration,

    /// Chat user ids allowed to administer clients.
    pub admin_ids: HashSet<i64>,

    /// Idle lifetime of a provisioning dialogue.
    pub session_ttl: Duration,
}

impl WardenConfig {
    /// Build a configuration with defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            registry_path: data_dir.join("clients.json"),
            proxy_config_path: PathBuf::from(DEFAULT_XRAY_CONFIG),
            profile_path: data_dir.join("vpn_config.json"),
            xray_binary: "xray".to_string(),
            stats_server: DEFAULT_STATS_SERVER.to_string(),
            service_name: "xray".to_string(),
            systemctl_binary: "systemctl".to_string(),
            inbound_index: 0,
            client_flow: "xtls-rprx-vision".to_string(),
            fallback_destination: "www.microsoft.com:443".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            admin_ids: HashSet::new(),
            session_ttl: Duration::from_secs(10 * 60),
        }
    }

    /// Build a configuration from `PROXYWARDEN_*` environment variables.
    ///
    /// Unset variables fall back to the defaults of [`with_data_dir`](Self::with_data_dir);
    /// the data directory itself defaults to `dirs::data_dir()/proxywarden`.
    pub fn from_env() -> Result<Self, WardenError> {
        let data_dir = match env::var_os("PROXYWARDEN_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or_else(|| {
                    WardenError::ConfigError("Could not find data directory".to_string())
                })?
                .join("proxywarden"),
        };

        let mut config = Self::with_data_dir(data_dir);

        if let Ok(path) = env::var("PROXYWARDEN_XRAY_CONFIG") {
            config.proxy_config_path = PathBuf::from(path);
        }
        if let Ok(bin) = env::var("PROXYWARDEN_XRAY_BIN") {
            config.xray_binary = bin;
        }
        if let Ok(server) = env::var("PROXYWARDEN_STATS_SERVER") {
            config.stats_server = server;
        }
        if let Ok(ids) = env::var("PROXYWARDEN_ADMIN_IDS") {
            config.admin_ids = parse_admin_ids(&ids);
        }
        if let Ok(secs) = env::var("PROXYWARDEN_COMMAND_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                WardenError::ConfigError(format!(
                    "PROXYWARDEN_COMMAND_TIMEOUT_SECS must be an integer: {}",
                    e
                ))
            })?;
            config.command_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.registry_path.as_os_str().is_empty() {
            return Err(WardenError::ConfigError(
                "registry_path cannot be empty".to_string(),
            ));
        }
        if self.proxy_config_path.as_os_str().is_empty() {
            return Err(WardenError::ConfigError(
                "proxy_config_path cannot be empty".to_string(),
            ));
        }
        if self.xray_binary.is_empty() || self.systemctl_binary.is_empty() {
            return Err(WardenError::ConfigError(
                "external binaries cannot be empty".to_string(),
            ));
        }
        if self.client_flow.is_empty() {
            return Err(WardenError::ConfigError(
                "client_flow cannot be empty".to_string(),
            ));
        }
        if self.command_timeout.is_zero() {
            return Err(WardenError::ConfigError(
                "command_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the given chat user may administer clients.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Parse a comma separated id list, skipping anything that is not an integer.
fn parse_admin_ids(raw: &str) -> HashSet<i64> {
    raw.split(',')
        .filter_map(|item| item.trim().parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WardenConfig::with_data_dir("/var/lib/proxywarden");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.registry_path,
            PathBuf::from("/var/lib/proxywarden/clients.json")
        );
        assert_eq!(config.command_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = WardenConfig::with_data_dir("/tmp/pw");
        config.command_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(WardenError::ConfigError(_))
        ));
    }

    #[test]
    fn test_empty_flow_rejected() {
        let mut config = WardenConfig::with_data_dir("/tmp/pw");
        config.client_flow.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_admin_ids_skips_garbage() {
        let ids = parse_admin_ids("42, 7,abc,,  -3");
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&42));
        assert!(ids.contains(&7));
        assert!(ids.contains(&-3));
    }

    #[test]
    fn test_is_admin() {
        let mut config = WardenConfig::with_data_dir("/tmp/pw");
        config.admin_ids = parse_admin_ids("100");
        assert!(config.is_admin(100));
        assert!(!config.is_admin(101));
    }
}
