//! File-backed registry store with atomic full-document replacement.
//!
//! The registry is one JSON document, `{"clients": [...]}`, in creation
//! order. Callers always read the whole set, modify it, and write the
//! whole set back; there is no partial patch.

use crate::persist::write_atomic;
use crate::registry::model::Client;
use crate::WardenError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    clients: Vec<Client>,
}

/// File-based client registry.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    /// Path of the registry document.
    path: PathBuf,
}

impl RegistryStore {
    /// Create a store for the document at `path`.
    ///
    /// Nothing is touched on disk until the first `save`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every client in creation order.
    ///
    /// A missing document is an empty registry.
    pub fn load(&self) -> Result<Vec<Client>, WardenError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WardenError::RegistryIO(format!(
                    "Failed to read registry: {}",
                    e
                )))
            }
        };

        if json.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: RegistryDocument = serde_json::from_str(&json)
            .map_err(|e| WardenError::RegistryIO(format!("Failed to parse registry: {}", e)))?;
        Ok(document.clients)
    }

    /// Replace the persisted set with `clients`.
    ///
    /// Either the full new document becomes visible or the previous one
    /// stays in place.
    pub fn save(&self, clients: &[Client]) -> Result<(), WardenError> {
        let document = RegistryDocument {
            clients: clients.to_vec(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| WardenError::RegistryIO(format!("Failed to serialize registry: {}", e)))?;

        write_atomic(&self.path, json.as_bytes())
            .map_err(|e| WardenError::RegistryIO(format!("Failed to write registry: {}", e)))
    }

    /// Look up a client by name.
    pub fn find(&self, name: &str) -> Result<Client, WardenError> {
        self.load()?
            .into_iter()
            .find(|client| client.name == name)
            .ok_or_else(|| WardenError::NotFound {
                name: name.to_string(),
            })
    }
}
