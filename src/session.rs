//! Multi-step provisioning dialogue, one per requester.
//!
//! The chat front-end collects a name, a traffic quota, and a lifetime in
//! separate messages. This module holds that half-finished input; it never
//! touches the registry. Duplicate names are caught by
//! [`ClientManager::provision`](crate::ClientManager::provision).

use crate::registry::model::normalize_name;
use crate::WardenError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// What the dialogue is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// Client name.
    AwaitingName,
    /// Traffic quota in GiB (`0` = unlimited).
    AwaitingQuota,
    /// Lifetime in days (`0` = no expiry).
    AwaitingTtl,
}

/// Completed provisioning input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Normalized client name.
    pub name: String,
    /// Traffic quota in GiB; `None` is unlimited.
    pub traffic_quota_gb: Option<u64>,
    /// Lifetime in days; `None` never expires.
    pub ttl_days: Option<u32>,
}

/// Result of feeding one answer into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionProgress {
    /// More input is needed.
    Awaiting(SessionStep),
    /// All input collected.
    Ready(ProvisionRequest),
}

/// One requester's dialogue state.
#[derive(Debug, Clone)]
pub struct ProvisioningSession {
    step: SessionStep,
    name: Option<String>,
    traffic_quota_gb: Option<u64>,
    last_activity: DateTime<Utc>,
}

impl ProvisioningSession {
    /// Start a dialogue at the name step.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            step: SessionStep::AwaitingName,
            name: None,
            traffic_quota_gb: None,
            last_activity: now,
        }
    }

    /// Current step.
    pub fn step(&self) -> SessionStep {
        self.step
    }

    /// Feed the next answer.
    ///
    /// Invalid input leaves the step unchanged so the question can be asked again.
    pub fn submit(&mut self, input: &str, now: DateTime<Utc>) -> Result<SessionProgress, WardenError> {
        self.last_activity = now;

        match self.step {
            SessionStep::AwaitingName => {
                self.name = Some(normalize_name(input)?);
                self.step = SessionStep::AwaitingQuota;
                Ok(SessionProgress::Awaiting(self.step))
            }
            SessionStep::AwaitingQuota => {
                let gb: u64 = parse_count(input, "traffic quota")?;
                self.traffic_quota_gb = Some(gb).filter(|gb| *gb > 0);
                self.step = SessionStep::AwaitingTtl;
                Ok(SessionProgress::Awaiting(self.step))
            }
            SessionStep::AwaitingTtl => {
                let days: u32 = parse_count(input, "lifetime in days")?;
                let name = self.name.clone().ok_or_else(|| {
                    WardenError::InvalidInput("client name was not provided".to_string())
                })?;
                Ok(SessionProgress::Ready(ProvisionRequest {
                    name,
                    traffic_quota_gb: self.traffic_quota_gb,
                    ttl_days: Some(days).filter(|d| *d > 0),
                }))
            }
        }
    }

    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.last_activity) > ttl
    }
}

fn parse_count<T: std::str::FromStr>(input: &str, what: &str) -> Result<T, WardenError> {
    input
        .trim()
        .parse()
        .map_err(|_| WardenError::InvalidInput(format!("{} must be a whole number", what)))
}

/// Open dialogues keyed by requester id.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<i64, ProvisioningSession>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(365)),
        }
    }

    /// Start (or restart) a dialogue for `requester`.
    pub fn begin(&mut self, requester: i64, now: DateTime<Utc>) -> SessionStep {
        let session = ProvisioningSession::new(now);
        let step = session.step();
        self.sessions.insert(requester, session);
        step
    }

    /// Step a requester is currently on, if a live dialogue exists.
    pub fn step(&self, requester: i64, now: DateTime<Utc>) -> Option<SessionStep> {
        self.sessions
            .get(&requester)
            .filter(|session| !session.is_stale(now, self.ttl))
            .map(ProvisioningSession::step)
    }

    /// Feed an answer into the requester's dialogue.
    ///
    /// A completed dialogue is removed from the store.
    pub fn submit(
        &mut self,
        requester: i64,
        input: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionProgress, WardenError> {
        let ttl = self.ttl;
        let stale = match self.sessions.get(&requester) {
            Some(session) => session.is_stale(now, ttl),
            None => return Err(no_session()),
        };
        if stale {
            self.sessions.remove(&requester);
            return Err(no_session());
        }

        let session = self.sessions.get_mut(&requester).ok_or_else(no_session)?;
        let progress = session.submit(input, now)?;
        if matches!(progress, SessionProgress::Ready(_)) {
            self.sessions.remove(&requester);
        }
        Ok(progress)
    }

    /// Abandon the requester's dialogue. Returns whether one existed.
    pub fn cancel(&mut self, requester: i64) -> bool {
        self.sessions.remove(&requester).is_some()
    }

    /// Drop every stale dialogue; returns how many were dropped.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_stale(now, ttl));
        before - self.sessions.len()
    }

    /// Number of open dialogues.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no dialogue is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn no_session() -> WardenError {
    WardenError::InvalidInput("no provisioning in progress".to_string())
}
