//! Client Manager - the main public API for Proxywarden.
//!
//! The `ClientManager` keeps two independent stores consistent:
//! - the client registry (identity and policy)
//! - the proxy's live client list (who may connect)
//!
//! Every operation that mutates either store, and every reconciliation
//! sweep, runs under one lock covering both as a unit. Removals from the
//! live config always happen before the registry records them, so an
//! interruption leaves the proxy denying access rather than granting it.

use crate::clock::{Clock, SystemClock};
use crate::config::WardenConfig;
use crate::meter::usage::{quota_percent, Usage};
use crate::policy::quota::{evaluate, Verdict};
use crate::profile::link::build_vless_link;
use crate::profile::server::ServerProfile;
use crate::proxy::adapter::{ProxyConfigAdapter, RoutingParameter};
use crate::proxy::command::{CommandRunner, SystemCommandRunner};
use crate::proxy::stats::{StatsProvider, XrayStats};
use crate::registry::model::{normalize_name, Client, DisabledReason};
use crate::registry::store::RegistryStore;
use crate::WardenError;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a mutation whose proxy reload may not have been confirmed.
#[derive(Debug, Clone)]
pub struct Applied<T> {
    /// The operation's result.
    pub value: T,

    /// Set when the config was written but the proxy reload failed.
    /// The operator should restart the proxy by hand.
    pub reload_warning: Option<String>,
}

/// Read-only view of one client for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatusView {
    /// Client name.
    pub name: String,
    /// Credential value.
    pub identity: Uuid,
    /// Whether the client is provisioned.
    pub active: bool,
    /// Suspension reason, if suspended.
    pub disabled_reason: Option<DisabledReason>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Normalized quota in GiB.
    pub traffic_quota_gb: Option<u64>,
    /// Expiry time.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whole days until expiry, clamped at zero.
    pub days_left: Option<i64>,
    /// Best known cumulative usage.
    pub used_bytes: u64,
    /// Live counters, when they were queried.
    pub live_usage: Option<Usage>,
    /// Share of the quota used, 0..=100.
    pub quota_percent: Option<u8>,
}

/// Whole-server overview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSummary {
    /// Registered clients.
    pub total: usize,
    /// Active clients.
    pub active: usize,
    /// Live traffic summed over all clients.
    pub usage: Usage,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Active clients evaluated.
    pub checked: usize,
    /// Clients whose cached usage grew.
    pub refreshed: usize,
    /// Clients suspended, in registry order.
    pub suspended: Vec<(String, DisabledReason)>,
    /// Clients whose suspension could not be applied this round.
    pub failed: Vec<String>,
    /// Reload failures after a successful config write.
    pub reload_warnings: Vec<String>,
    /// Whether the registry was saved.
    pub persisted: bool,
}

/// Main client manager for Proxywarden.
///
/// This is the primary public API. Create one instance per process and
/// share it; it serializes its own mutations.
pub struct ClientManager {
    config: WardenConfig,
    clock: Arc<dyn Clock>,
    registry: RegistryStore,
    adapter: ProxyConfigAdapter,
    stats: Arc<dyn StatsProvider>,
    lock: Mutex<()>,
}

impl ClientManager {
    /// Create a client manager with the given configuration.
    ///
    /// Uses the system clock, `systemctl` for reloads, and the `xray` CLI
    /// for stats.
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration validation fails.
    pub fn new(config: WardenConfig) -> Result<Self, WardenError> {
        config.validate()?;
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemCommandRunner::new(config.command_timeout));
        let stats = Arc::new(XrayStats::new(
            config.xray_binary.clone(),
            config.stats_server.clone(),
            runner.clone(),
        ));
        Self::with_parts(config, Arc::new(SystemClock), runner, stats)
    }

    /// Create a client manager from explicit collaborators.
    pub fn with_parts(
        config: WardenConfig,
        clock: Arc<dyn Clock>,
        runner: Arc<dyn CommandRunner>,
        stats: Arc<dyn StatsProvider>,
    ) -> Result<Self, WardenError> {
        config.validate()?;
        let registry = RegistryStore::new(config.registry_path.clone());
        let adapter = ProxyConfigAdapter::new(&config, runner);

        Ok(Self {
            config,
            clock,
            registry,
            adapter,
            stats,
            lock: Mutex::new(()),
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// The live config adapter.
    pub fn adapter(&self) -> &ProxyConfigAdapter {
        &self.adapter
    }

    /// Run one reconciliation sweep.
    ///
    /// 1. Load all clients
    /// 2. For each active client: refresh usage if it has a quota,
    ///    then evaluate expiry and quota
    /// 3. For each suspending verdict: remove from the live config,
    ///    then mark suspended
    /// 4. Save the registry if anything changed
    ///
    /// A client whose removal fails stays active this round and the sweep
    /// moves on to the next one. Suspension is one-directional; no client
    /// is ever re-admitted here.
    ///
    /// # Errors
    /// - `RegistryIO` - the registry could not be loaded or saved
    pub async fn sweep(&self) -> Result<SweepReport, WardenError> {
        let _guard = self.lock.lock().await;

        let mut clients = self.registry.load()?;
        let now = self.clock.now_utc();
        let mut report = SweepReport::default();
        let mut dirty = false;

        for client in clients.iter_mut().filter(|client| client.active) {
            report.checked += 1;

            if client.quota_gb().is_some() {
                let usage = self.stats.get_usage(&client.name).await;
                if client.observe_usage(usage.total()) {
                    report.refreshed += 1;
                    dirty = true;
                }
            }

            let verdict = evaluate(client, client.used_bytes, now);
            let Some(reason) = verdict.disabled_reason() else {
                continue;
            };

            match self.adapter.remove_client(&client.identity).await {
                Ok(()) => {}
                Err(WardenError::Reload(msg)) => {
                    warn!(client = %client.name, error = %msg, "suspended client but proxy reload failed");
                    report.reload_warnings.push(msg);
                }
                Err(e) => {
                    error!(client = %client.name, error = %e, "could not remove client from proxy config");
                    report.failed.push(client.name.clone());
                    continue;
                }
            }

            client.suspend(reason);
            dirty = true;
            info!(client = %client.name, reason = %reason, "suspended client");
            report.suspended.push((client.name.clone(), reason));
        }

        if dirty {
            self.registry.save(&clients)?;
            report.persisted = true;
        }

        Ok(report)
    }

    /// Provision a new client on both stores.
    ///
    /// `Some(0)` for either limit means no limit.
    ///
    /// # Errors
    /// - `InvalidInput` - the name is empty or has unsupported characters
    /// - `DuplicateName` - the name is taken, including by a suspended client
    /// - `ConfigRead` / `ConfigWrite` - the live config could not be updated
    /// - `RegistryIO` - the registry could not be saved (live entry is rolled back)
    pub async fn provision(
        &self,
        name: &str,
        traffic_quota_gb: Option<u64>,
        ttl_days: Option<u32>,
    ) -> Result<Applied<Client>, WardenError> {
        let name = normalize_name(name)?;
        let _guard = self.lock.lock().await;

        let mut clients = self.registry.load()?;
        if clients.iter().any(|client| client.name == name) {
            return Err(WardenError::DuplicateName { name });
        }

        let identity = loop {
            let candidate = Uuid::new_v4();
            if !clients.iter().any(|client| client.identity == candidate) {
                break candidate;
            }
        };

        let now = self.clock.now_utc();
        let expires_at = ttl_days
            .filter(|days| *days > 0)
            .map(|days| now + Duration::days(i64::from(days)));
        let client = Client::new(name.clone(), identity, traffic_quota_gb, expires_at, now);

        let reload_warning = reload_as_warning(self.adapter.add_client(&identity, &name).await)?;

        clients.push(client.clone());
        if let Err(e) = self.registry.save(&clients) {
            error!(client = %name, error = %e, "registry save failed, rolling back proxy entry");
            if let Err(undo) = self.adapter.remove_client(&identity).await {
                error!(client = %name, error = %undo, "rollback of proxy entry failed");
            }
            return Err(e);
        }

        info!(
            client = %name,
            quota_gb = ?client.traffic_quota_gb,
            expires_at = ?client.expires_at,
            "provisioned client"
        );
        Ok(Applied {
            value: client,
            reload_warning,
        })
    }

    /// Remove a client from both stores.
    ///
    /// Returns the removed record.
    ///
    /// # Errors
    /// - `NotFound` - no client has this name
    /// - `ConfigRead` / `ConfigWrite` - the live config could not be updated
    pub async fn deprovision(&self, name: &str) -> Result<Applied<Client>, WardenError> {
        let name = stored_name(name)?;
        let _guard = self.lock.lock().await;

        let mut clients = self.registry.load()?;
        let index = clients
            .iter()
            .position(|client| client.name == name)
            .ok_or_else(|| WardenError::NotFound {
                name: name.to_string(),
            })?;

        let reload_warning =
            reload_as_warning(self.adapter.remove_client(&clients[index].identity).await)?;

        let removed = clients.remove(index);
        self.registry.save(&clients)?;

        info!(client = %name, "deprovisioned client");
        Ok(Applied {
            value: removed,
            reload_warning,
        })
    }

    /// Look up a client record.
    ///
    /// `name` is normalized the way [`provision`](Self::provision) does.
    pub fn find(&self, name: &str) -> Result<Client, WardenError> {
        self.registry.find(&stored_name(name)?)
    }

    /// Status of one client, with a live usage query.
    ///
    /// Never mutates the registry.
    pub async fn get_status(&self, name: &str) -> Result<ClientStatusView, WardenError> {
        let client = self.find(name)?;
        let live = self.stats.get_usage(&client.name).await;
        Ok(status_view(&client, Some(live), self.clock.now_utc()))
    }

    /// Status of every client in registry order.
    ///
    /// Live usage is queried only for clients with a quota.
    pub async fn list(&self) -> Result<Vec<ClientStatusView>, WardenError> {
        let clients = self.registry.load()?;
        let now = self.clock.now_utc();

        let mut views = Vec::with_capacity(clients.len());
        for client in &clients {
            let live = match client.quota_gb() {
                Some(_) => Some(self.stats.get_usage(&client.name).await),
                None => None,
            };
            views.push(status_view(client, live, now));
        }
        Ok(views)
    }

    /// Client counts and total live traffic.
    pub async fn summary(&self) -> Result<ServerSummary, WardenError> {
        let clients = self.registry.load()?;

        let mut summary = ServerSummary {
            total: clients.len(),
            active: clients.iter().filter(|client| client.active).count(),
            usage: Usage::default(),
        };
        for client in &clients {
            summary.usage = summary.usage + self.stats.get_usage(&client.name).await;
        }
        Ok(summary)
    }

    /// Switch the camouflage server name; empty restores the fallback.
    ///
    /// Reads the server profile, updates the live config and reloads, then
    /// records the choice in the profile so new share links carry it.
    pub async fn rotate_routing_parameter(&self, server_name: &str) -> Result<Applied<()>, WardenError> {
        let server_name = server_name.trim();
        if !server_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'))
        {
            return Err(WardenError::InvalidInput(format!(
                "invalid server name {:?}",
                server_name
            )));
        }

        let _guard = self.lock.lock().await;

        // An unreadable profile aborts before the live config is touched.
        let mut profile = ServerProfile::load(&self.config.profile_path)?;

        let parameter = RoutingParameter::ServerName(server_name.to_string());
        let reload_warning = reload_as_warning(self.adapter.set_routing_parameter(&parameter).await)?;

        profile.chosen_sni = server_name.to_string();
        profile.dest = Some(if server_name.is_empty() {
            self.config.fallback_destination.clone()
        } else {
            format!("{}:443", server_name)
        });
        profile.save(&self.config.profile_path)?;

        info!(server_name, "rotated camouflage server name");
        Ok(Applied {
            value: (),
            reload_warning,
        })
    }

    /// Server names offered for rotation.
    pub fn candidate_server_names(&self) -> Result<Vec<String>, WardenError> {
        let profile = ServerProfile::load(&self.config.profile_path)?;
        Ok(profile.server_name_candidates().to_vec())
    }

    /// Share link for a registered client.
    pub fn connection_link(&self, name: &str) -> Result<String, WardenError> {
        let client = self.find(name)?;
        let profile = ServerProfile::load(&self.config.profile_path)?;
        build_vless_link(&profile, &client.identity, &client.name, &self.config.client_flow)
    }

    /// Share link for the server owner's own credential.
    pub fn owner_link(&self, tag: &str) -> Result<String, WardenError> {
        let profile = ServerProfile::load(&self.config.profile_path)?;
        let identity = profile
            .uuid
            .as_deref()
            .ok_or_else(|| WardenError::ProfileIO("server profile is missing uuid".to_string()))
            .and_then(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|e| WardenError::ProfileIO(format!("invalid owner uuid: {}", e)))
            })?;
        build_vless_link(&profile, &identity, tag, &self.config.client_flow)
    }
}

/// Normalize a lookup name; a name `provision` would reject cannot exist.
fn stored_name(name: &str) -> Result<String, WardenError> {
    normalize_name(name).map_err(|_| WardenError::NotFound {
        name: name.to_string(),
    })
}

/// Turn a reload failure into a warning; every other error stays fatal.
fn reload_as_warning(result: Result<(), WardenError>) -> Result<Option<String>, WardenError> {
    match result {
        Ok(()) => Ok(None),
        Err(WardenError::Reload(msg)) => {
            warn!(error = %msg, "config written but proxy reload failed; restart it manually");
            Ok(Some(msg))
        }
        Err(e) => Err(e),
    }
}

fn status_view(client: &Client, live: Option<Usage>, now: DateTime<Utc>) -> ClientStatusView {
    let live_total = live.map(|usage| usage.total()).unwrap_or(0);
    let used_bytes = client.used_bytes.max(live_total);

    ClientStatusView {
        name: client.name.clone(),
        identity: client.identity,
        active: client.active,
        disabled_reason: client.disabled_reason,
        created_at: client.created_at,
        traffic_quota_gb: client.quota_gb(),
        expires_at: client.expires_at,
        days_left: client.days_left(now),
        used_bytes,
        live_usage: live,
        quota_percent: client.quota_gb().map(|gb| quota_percent(used_bytes, gb)),
    }
}

/// Whether a verdict would suspend `client` right now, using cached usage.
///
/// Handy for front-ends that want to flag clients between sweeps.
pub fn pending_verdict(client: &Client, now: DateTime<Utc>) -> Verdict {
    if !client.active {
        return Verdict::Keep;
    }
    evaluate(client, client.used_bytes, now)
}
