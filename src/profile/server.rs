//! Server connection profile (`vpn_config.json`).
//!
//! Written by the installer; the engine only reads it, except for the
//! chosen camouflage server name which rotation records back.

use crate::persist::write_atomic;
use crate::WardenError;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// How many rotation candidates are offered at once.
pub const MAX_SERVER_NAME_CANDIDATES: usize = 6;

/// Public connection parameters of the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Public address clients dial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,

    /// Listening port.
    #[serde(
        default,
        deserialize_with = "port_from_number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,

    /// Reality public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Reality short id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,

    /// Camouflage server name currently in use; empty means none.
    #[serde(default)]
    pub chosen_sni: String,

    /// TLS fingerprint clients should imitate.
    #[serde(default)]
    pub fingerprint: String,

    /// Camouflage destination currently in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,

    /// Server names known to work from the client side.
    #[serde(default)]
    pub working_snis: Vec<String>,

    /// Owner's own credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Keys this crate does not interpret, kept for the rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Installers have written the port both as a number and as a string.
fn port_from_number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u16>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid port: {}", n))),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid port: {}", other))),
    }
}

impl ServerProfile {
    /// Load the profile; a missing file is an empty profile.
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(WardenError::ProfileIO(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&json)
            .map_err(|e| WardenError::ProfileIO(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Persist the profile atomically.
    pub fn save(&self, path: &Path) -> Result<(), WardenError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WardenError::ProfileIO(format!("Failed to serialize profile: {}", e)))?;
        write_atomic(path, json.as_bytes())
            .map_err(|e| WardenError::ProfileIO(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Rotation candidates, in preference order.
    pub fn server_name_candidates(&self) -> &[String] {
        let len = self.working_snis.len().min(MAX_SERVER_NAME_CANDIDATES);
        &self.working_snis[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_profile_is_empty() {
        let dir = TempDir::new().unwrap();
        let profile = ServerProfile::load(&dir.path().join("vpn_config.json")).unwrap();
        assert_eq!(profile, ServerProfile::default());
    }

    #[test]
    fn test_unknown_keys_survive_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vpn_config.json");
        fs::write(
            &path,
            r#"{"public_ip": "203.0.113.7", "port": 443, "private_key": "secret", "chosen_sni": ""}"#,
        )
        .unwrap();

        let mut profile = ServerProfile::load(&path).unwrap();
        assert_eq!(profile.public_ip.as_deref(), Some("203.0.113.7"));
        profile.chosen_sni = "www.example.com".to_string();
        profile.save(&path).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["private_key"], "secret");
        assert_eq!(raw["chosen_sni"], "www.example.com");
    }

    #[test]
    fn test_port_as_string() {
        let profile: ServerProfile = serde_json::from_str(r#"{"port": "8443"}"#).unwrap();
        assert_eq!(profile.port, Some(8443));
        assert!(serde_json::from_str::<ServerProfile>(r#"{"port": 70000}"#).is_err());
    }

    #[test]
    fn test_candidates_are_capped() {
        let profile = ServerProfile {
            working_snis: (0..9).map(|i| format!("sni{}.example", i)).collect(),
            ..Default::default()
        };
        assert_eq!(profile.server_name_candidates().len(), MAX_SERVER_NAME_CANDIDATES);
        assert_eq!(profile.server_name_candidates()[0], "sni0.example");
    }

    #[test]
    fn test_malformed_profile_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vpn_config.json");
        fs::write(&path, "[").unwrap();
        assert!(matches!(ServerProfile::load(&path), Err(WardenError::ProfileIO(_))));
    }
}
