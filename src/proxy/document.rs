//! Xray config document access.
//!
//! The live config is treated as an opaque JSON document; only two spots
//! are touched:
//! - `inbounds[i].settings.clients` - the client list
//! - `inbounds[i].streamSettings.realitySettings` - the camouflage target
//!
//! Everything else is carried through a rewrite untouched.

use crate::WardenError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One entry of the proxy's client list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyClientEntry {
    /// Credential value.
    pub id: String,

    /// Flow mode.
    pub flow: String,

    /// Accounting label.
    pub email: String,
}

/// Hex SHA-256 of a document as read from disk.
///
/// Used to detect a concurrent edit between read and write.
pub fn document_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parsed live config.
#[derive(Debug, Clone)]
pub struct XrayDocument {
    root: Value,
    inbound_index: usize,
}

impl XrayDocument {
    /// Parse a document, addressing the inbound at `inbound_index`.
    pub fn parse(json: &str, inbound_index: usize) -> Result<Self, WardenError> {
        let root: Value = serde_json::from_str(json)
            .map_err(|e| WardenError::ConfigRead(format!("Failed to parse proxy config: {}", e)))?;

        let document = Self {
            root,
            inbound_index,
        };
        // Fail early if the fixed schema path is missing.
        document.inbound()?;
        Ok(document)
    }

    /// Serialize back to pretty JSON.
    pub fn to_json(&self) -> Result<String, WardenError> {
        serde_json::to_string_pretty(&self.root)
            .map_err(|e| WardenError::ConfigWrite(format!("Failed to serialize proxy config: {}", e)))
    }

    fn inbound(&self) -> Result<&Value, WardenError> {
        self.root
            .get("inbounds")
            .and_then(|inbounds| inbounds.get(self.inbound_index))
            .ok_or_else(|| {
                WardenError::ConfigRead(format!("inbounds[{}] not found", self.inbound_index))
            })
    }

    fn inbound_mut(&mut self) -> Result<&mut Value, WardenError> {
        let index = self.inbound_index;
        self.root
            .get_mut("inbounds")
            .and_then(|inbounds| inbounds.get_mut(index))
            .ok_or_else(|| WardenError::ConfigRead(format!("inbounds[{}] not found", index)))
    }

    fn clients_mut(&mut self) -> Result<&mut Vec<Value>, WardenError> {
        let index = self.inbound_index;
        let settings = self
            .inbound_mut()?
            .as_object_mut()
            .ok_or_else(|| WardenError::ConfigRead(format!("inbounds[{}] is not an object", index)))?
            .entry("settings")
            .or_insert_with(|| Value::Object(Default::default()));

        settings
            .as_object_mut()
            .ok_or_else(|| WardenError::ConfigRead("settings is not an object".to_string()))?
            .entry("clients")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| WardenError::ConfigRead("settings.clients is not a list".to_string()))
    }

    /// Credential values currently in the client list.
    pub fn identities(&self) -> Vec<String> {
        self.inbound()
            .ok()
            .and_then(|inbound| inbound.pointer("/settings/clients"))
            .and_then(Value::as_array)
            .map(|clients| {
                clients
                    .iter()
                    .filter_map(|c| c.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `identity` is present in the client list.
    pub fn contains(&self, identity: &Uuid) -> bool {
        let wanted = identity.to_string();
        self.identities()
            .iter()
            .any(|id| id.eq_ignore_ascii_case(&wanted))
    }

    /// Append an entry unless its credential is already listed.
    ///
    /// Returns `true` if the list changed.
    pub fn add_client(&mut self, entry: &ProxyClientEntry) -> Result<bool, WardenError> {
        let clients = self.clients_mut()?;
        let present = clients.iter().any(|c| {
            c.get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.eq_ignore_ascii_case(&entry.id))
        });
        if present {
            return Ok(false);
        }

        let value = serde_json::to_value(entry)
            .map_err(|e| WardenError::ConfigWrite(format!("Failed to encode client entry: {}", e)))?;
        clients.push(value);
        Ok(true)
    }

    /// Remove every entry with this credential.
    ///
    /// Returns `true` if the list changed; an absent credential is not an error.
    pub fn remove_client(&mut self, identity: &Uuid) -> Result<bool, WardenError> {
        let wanted = identity.to_string();
        let clients = self.clients_mut()?;
        let before = clients.len();
        clients.retain(|c| {
            !c.get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.eq_ignore_ascii_case(&wanted))
        });
        Ok(clients.len() != before)
    }

    fn reality_settings_mut(&mut self) -> Result<&mut serde_json::Map<String, Value>, WardenError> {
        self.inbound_mut()?
            .pointer_mut("/streamSettings/realitySettings")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                WardenError::ConfigRead("streamSettings.realitySettings not found".to_string())
            })
    }

    /// Set the camouflage destination (`host:port`).
    pub fn set_destination(&mut self, destination: &str) -> Result<(), WardenError> {
        self.reality_settings_mut()?
            .insert("dest".to_string(), Value::String(destination.to_string()));
        Ok(())
    }

    /// Set the accepted server names.
    pub fn set_server_names(&mut self, names: &[String]) -> Result<(), WardenError> {
        let names = names.iter().cloned().map(Value::String).collect();
        self.reality_settings_mut()?
            .insert("serverNames".to_string(), Value::Array(names));
        Ok(())
    }

    /// Current camouflage destination.
    pub fn destination(&self) -> Option<&str> {
        self.inbound()
            .ok()?
            .pointer("/streamSettings/realitySettings/dest")
            .and_then(Value::as_str)
    }
}
