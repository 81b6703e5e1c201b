//! Live proxy config adapter.
//!
//! Every mutation is read full document → transform → write full document
//! → reload. The document has no stable append point, so there is no
//! incremental patching.
//!
//! Failure semantics:
//! - `ConfigRead` / `ConfigWrite` - nothing was written
//! - `Reload` - the write succeeded but the proxy did not confirm the
//!   reload; the live process may still run the old config

use crate::config::WardenConfig;
use crate::persist::write_atomic;
use crate::proxy::command::CommandRunner;
use crate::proxy::document::{document_digest, ProxyClientEntry, XrayDocument};
use crate::WardenError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A routing setting of the evasion layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingParameter {
    /// Camouflage server name. Sets `dest` to `<name>:443` and
    /// `serverNames` to `[name]`; an empty name restores the fallback
    /// destination with no server names.
    ServerName(String),

    /// Camouflage destination (`host:port`) only.
    Destination(String),
}

/// Reads and rewrites the proxy's live client list.
pub struct ProxyConfigAdapter {
    path: PathBuf,
    inbound_index: usize,
    client_flow: String,
    fallback_destination: String,
    systemctl_binary: String,
    service_name: String,
    runner: Arc<dyn CommandRunner>,
}

impl ProxyConfigAdapter {
    /// Create an adapter for the document named in `config`.
    pub fn new(config: &WardenConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: config.proxy_config_path.clone(),
            inbound_index: config.inbound_index,
            client_flow: config.client_flow.clone(),
            fallback_destination: config.fallback_destination.clone(),
            systemctl_binary: config.systemctl_binary.clone(),
            service_name: config.service_name.clone(),
            runner,
        }
    }

    /// Path of the live document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the live document.
    pub fn read(&self) -> Result<XrayDocument, WardenError> {
        self.load().map(|(document, _)| document)
    }

    /// Append a client entry and reload.
    pub async fn add_client(&self, identity: &Uuid, label: &str) -> Result<(), WardenError> {
        let entry = ProxyClientEntry {
            id: identity.to_string(),
            flow: self.client_flow.clone(),
            email: label.to_string(),
        };

        let changed = self.rewrite(|document| document.add_client(&entry))?;
        if changed {
            info!(client = %label, "added client to proxy config");
        }
        self.reload().await
    }

    /// Remove the entry for `identity` and reload.
    ///
    /// An absent identity is not an error.
    pub async fn remove_client(&self, identity: &Uuid) -> Result<(), WardenError> {
        let changed = self.rewrite(|document| document.remove_client(identity))?;
        if changed {
            info!(%identity, "removed client from proxy config");
        } else {
            debug!(%identity, "client already absent from proxy config");
        }
        self.reload().await
    }

    /// Rewrite a routing setting and reload.
    pub async fn set_routing_parameter(&self, parameter: &RoutingParameter) -> Result<(), WardenError> {
        self.rewrite(|document| {
            match parameter {
                RoutingParameter::ServerName(name) if name.is_empty() => {
                    document.set_destination(&self.fallback_destination)?;
                    document.set_server_names(&[])?;
                }
                RoutingParameter::ServerName(name) => {
                    document.set_destination(&format!("{}:443", name))?;
                    document.set_server_names(&[name.clone()])?;
                }
                RoutingParameter::Destination(destination) => {
                    document.set_destination(destination)?;
                }
            }
            Ok(true)
        })?;
        info!(?parameter, "updated routing parameter");
        self.reload().await
    }

    /// Ask the proxy to pick up the current document.
    ///
    /// Tries `reload` first and falls back to `restart`.
    pub async fn reload(&self) -> Result<(), WardenError> {
        let mut last_error = String::new();

        for action in ["reload", "restart"] {
            let args = vec![action.to_string(), self.service_name.clone()];
            match self.runner.run(&self.systemctl_binary, &args).await {
                Ok(output) if output.success => {
                    debug!(action, service = %self.service_name, "proxy reloaded");
                    return Ok(());
                }
                Ok(output) => last_error = format!("{} {}: {}", action, self.service_name, output.message()),
                Err(e) => last_error = e.to_string(),
            }
            warn!(action, error = %last_error, "proxy reload attempt failed");
        }

        Err(WardenError::Reload(last_error))
    }

    fn load(&self) -> Result<(XrayDocument, String), WardenError> {
        let bytes = fs::read(&self.path).map_err(|e| {
            WardenError::ConfigRead(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let json = std::str::from_utf8(&bytes)
            .map_err(|e| WardenError::ConfigRead(format!("Invalid UTF-8 in proxy config: {}", e)))?;

        let document = XrayDocument::parse(json, self.inbound_index)?;
        Ok((document, document_digest(&bytes)))
    }

    /// Apply `transform` to a fresh read and write the result back if it changed.
    fn rewrite<F>(&self, transform: F) -> Result<bool, WardenError>
    where
        F: FnOnce(&mut XrayDocument) -> Result<bool, WardenError>,
    {
        let (mut document, digest) = self.load()?;
        if !transform(&mut document)? {
            return Ok(false);
        }

        let json = document.to_json()?;

        // Refuse to clobber an edit made since our read.
        let current = fs::read(&self.path).map_err(|e| {
            WardenError::ConfigWrite(format!("Failed to re-read {}: {}", self.path.display(), e))
        })?;
        if document_digest(&current) != digest {
            return Err(WardenError::ConfigWrite(format!(
                "{} changed on disk during update",
                self.path.display()
            )));
        }

        write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            WardenError::ConfigWrite(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        Ok(true)
    }
}
