//! Client records and their persisted layout.
//!
//! Field names on disk follow the layout existing registries already use
//! (`uuid`, `created`, `limit_gb`, `expires`), so a registry written by an
//! older panel loads unchanged.

use crate::policy::quota::normalize_quota;
use crate::WardenError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Bytes in one quota unit (GiB).
pub const BYTES_PER_GB: u64 = 1 << 30;

/// Why a client was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledReason {
    /// The expiry timestamp has passed.
    Expired,
    /// Cumulative traffic reached the quota.
    TrafficExceeded,
}

impl DisabledReason {
    /// Persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisabledReason::Expired => "expired",
            DisabledReason::TrafficExceeded => "traffic_exceeded",
        }
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provisioned account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Unique name; also the proxy's per-client accounting label.
    pub name: String,

    /// Credential the proxy authenticates connections with.
    #[serde(rename = "uuid")]
    pub identity: Uuid,

    /// Whether the client is currently provisioned on the live proxy.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Creation time.
    #[serde(rename = "created", with = "timestamp")]
    pub created_at: DateTime<Utc>,

    /// Traffic cap in GiB. `None` (or a legacy `0`) means unlimited.
    #[serde(rename = "limit_gb", default)]
    pub traffic_quota_gb: Option<u64>,

    /// Absolute expiry time.
    #[serde(rename = "expires", default, with = "timestamp::option")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Last observed uplink + downlink, cached for display.
    #[serde(default)]
    pub used_bytes: u64,

    /// Set when the client is suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<DisabledReason>,
}

fn default_active() -> bool {
    true
}

impl Client {
    /// Create a fresh, active client record.
    pub fn new(
        name: String,
        identity: Uuid,
        traffic_quota_gb: Option<u64>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            identity,
            active: true,
            created_at: now,
            traffic_quota_gb: normalize_quota(traffic_quota_gb),
            expires_at,
            used_bytes: 0,
            disabled_reason: None,
        }
    }

    /// Normalized quota in GiB: zero and absent both mean unlimited.
    pub fn quota_gb(&self) -> Option<u64> {
        normalize_quota(self.traffic_quota_gb)
    }

    /// Normalized quota in bytes.
    pub fn traffic_quota_bytes(&self) -> Option<u64> {
        self.quota_gb().map(|gb| gb.saturating_mul(BYTES_PER_GB))
    }

    /// Whether the expiry timestamp is strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    /// Whole days until expiry, clamped at zero.
    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at
            .map(|expires| expires.signed_duration_since(now).num_days().max(0))
    }

    /// Record a usage observation; cached usage never decreases.
    ///
    /// Returns `true` when the cached value changed.
    pub fn observe_usage(&mut self, total_bytes: u64) -> bool {
        if total_bytes > self.used_bytes {
            self.used_bytes = total_bytes;
            true
        } else {
            false
        }
    }

    /// Mark the client suspended.
    pub fn suspend(&mut self, reason: DisabledReason) {
        self.active = false;
        self.disabled_reason = Some(reason);
    }
}

/// Longest accepted client name.
pub const MAX_NAME_LEN: usize = 64;

/// Normalize a requested client name.
///
/// Surrounding whitespace is dropped and inner spaces become `_`. The
/// result must be non-empty ASCII alphanumerics plus `_`, `-`, `.`; the
/// name doubles as the proxy's accounting label, so separators the stats
/// pattern relies on (`>`) are never allowed.
pub fn normalize_name(raw: &str) -> Result<String, WardenError> {
    let name = raw.trim().replace(' ', "_");
    if name.is_empty() {
        return Err(WardenError::InvalidInput(
            "client name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(WardenError::InvalidInput(format!(
            "client name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(WardenError::InvalidInput(format!(
            "client name contains unsupported character {:?}",
            bad
        )));
    }
    Ok(name)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and the naive ISO-8601 form older registries wrote
/// (`2025-01-15T12:00:00.123456`), which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
}

mod timestamp {
    use super::parse_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::parse_timestamp;
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) if !raw.is_empty() => parse_timestamp(&raw)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                _ => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn sample() -> Client {
        Client::new(
            "alice".to_string(),
            Uuid::new_v4(),
            Some(10),
            None,
            at("2025-01-15T12:00:00Z"),
        )
    }

    #[test]
    fn test_new_client_is_active() {
        let client = sample();
        assert!(client.active);
        assert_eq!(client.used_bytes, 0);
        assert!(client.disabled_reason.is_none());
    }

    #[test]
    fn test_zero_quota_is_unlimited() {
        let mut client = sample();
        client.traffic_quota_gb = Some(0);
        assert_eq!(client.quota_gb(), None);
        assert_eq!(client.traffic_quota_bytes(), None);

        let fresh = Client::new("z".into(), Uuid::new_v4(), Some(0), None, Utc::now());
        assert_eq!(fresh.traffic_quota_gb, None);
    }

    #[test]
    fn test_quota_bytes_uses_binary_gigabytes() {
        let client = sample();
        assert_eq!(client.traffic_quota_bytes(), Some(10 * 1_073_741_824));
    }

    #[test]
    fn test_observe_usage_is_monotonic() {
        let mut client = sample();
        assert!(client.observe_usage(500));
        assert!(!client.observe_usage(0));
        assert!(!client.observe_usage(500));
        assert_eq!(client.used_bytes, 500);
    }

    #[test]
    fn test_expiry_is_strict() {
        let mut client = sample();
        let expires = at("2025-02-01T00:00:00Z");
        client.expires_at = Some(expires);

        assert!(!client.is_expired_at(expires));
        assert!(client.is_expired_at(expires + Duration::seconds(1)));
    }

    #[test]
    fn test_days_left_clamps_at_zero() {
        let mut client = sample();
        let now = at("2025-01-15T12:00:00Z");
        client.expires_at = Some(now + Duration::days(3) + Duration::hours(2));
        assert_eq!(client.days_left(now), Some(3));

        client.expires_at = Some(now - Duration::days(3));
        assert_eq!(client.days_left(now), Some(0));
    }

    #[test]
    fn test_legacy_record_parses() {
        let json = r#"{
            "name": "bob",
            "uuid": "6f1c2b7e-2d7f-4a3c-9a53-0f1f8f0b2a11",
            "created": "2025-01-10T09:30:00.123456",
            "limit_gb": null,
            "expires": "2025-02-09T09:30:00.123456",
            "used_bytes": 42
        }"#;
        let client: Client = serde_json::from_str(json).unwrap();

        assert!(client.active);
        assert_eq!(client.traffic_quota_gb, None);
        assert_eq!(client.used_bytes, 42);
        assert_eq!(
            client.expires_at.unwrap().to_rfc3339(),
            "2025-02-09T09:30:00.123456+00:00"
        );
    }

    #[test]
    fn test_disabled_reason_serialization() {
        let mut client = sample();
        client.suspend(DisabledReason::TrafficExceeded);

        let json = serde_json::to_value(&client).unwrap();
        assert_eq!(json["disabled_reason"], "traffic_exceeded");
        assert_eq!(json["active"], false);
        assert_eq!(json["limit_gb"], 10);
        assert!(json["expires"].is_null());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  ivan petrov ").unwrap(), "ivan_petrov");
        assert_eq!(normalize_name("a-b.c_9").unwrap(), "a-b.c_9");
        assert!(matches!(normalize_name("   "), Err(WardenError::InvalidInput(_))));
        assert!(normalize_name("bob>>>x").is_err());
        assert!(normalize_name("имя").is_err());
        assert!(normalize_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
