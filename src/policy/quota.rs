//! Quota and expiry enforcement.
//!
//! This module decides whether a client must be suspended based on:
//! - Expiry (strictly past `expires_at`)
//! - Traffic quota (cumulative uplink + downlink against the GiB cap)
//!
//! Expiry is checked first, so a client that is both expired and over
//! quota is recorded as expired.

use crate::registry::model::{Client, DisabledReason};
use chrono::{DateTime, Utc};

/// Outcome of evaluating one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Client stays provisioned.
    Keep,
    /// Expiry has passed.
    SuspendExpired,
    /// Traffic quota reached.
    SuspendTrafficExceeded,
}

impl Verdict {
    /// Reason to record for a suspending verdict.
    pub fn disabled_reason(&self) -> Option<DisabledReason> {
        match self {
            Verdict::Keep => None,
            Verdict::SuspendExpired => Some(DisabledReason::Expired),
            Verdict::SuspendTrafficExceeded => Some(DisabledReason::TrafficExceeded),
        }
    }

    /// Whether the client must be suspended.
    pub fn suspends(&self) -> bool {
        !matches!(self, Verdict::Keep)
    }
}

/// Normalize a GiB quota: zero means unlimited, same as absent.
pub fn normalize_quota(quota_gb: Option<u64>) -> Option<u64> {
    quota_gb.filter(|gb| *gb > 0)
}

/// Evaluate a client against its quota and expiry.
///
/// # Arguments
/// * `client` - The registry record
/// * `used_bytes` - Cumulative uplink + downlink to judge the quota against
/// * `now` - Evaluation time
pub fn evaluate(client: &Client, used_bytes: u64, now: DateTime<Utc>) -> Verdict {
    // 1. Expiry takes precedence
    if client.is_expired_at(now) {
        return Verdict::SuspendExpired;
    }

    // 2. Traffic quota
    if let Some(limit_bytes) = client.traffic_quota_bytes() {
        if used_bytes >= limit_bytes {
            return Verdict::SuspendTrafficExceeded;
        }
    }

    Verdict::Keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::BYTES_PER_GB;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn make_client(quota_gb: Option<u64>, expires_at: Option<DateTime<Utc>>) -> Client {
        let mut client = Client::new(
            "alice".to_string(),
            Uuid::new_v4(),
            None,
            expires_at,
            now() - Duration::days(30),
        );
        client.traffic_quota_gb = quota_gb;
        client
    }

    #[test]
    fn test_unlimited_client_is_kept() {
        let client = make_client(None, None);
        assert_eq!(evaluate(&client, u64::MAX, now()), Verdict::Keep);
    }

    #[test]
    fn test_zero_quota_behaves_like_absent() {
        let zero = make_client(Some(0), None);
        let absent = make_client(None, None);
        let usage = 500 * BYTES_PER_GB;

        assert_eq!(evaluate(&zero, usage, now()), evaluate(&absent, usage, now()));
        assert_eq!(evaluate(&zero, usage, now()), Verdict::Keep);
        assert_eq!(normalize_quota(Some(0)), None);
        assert_eq!(normalize_quota(Some(3)), Some(3));
    }

    #[test]
    fn test_under_quota_is_kept() {
        let client = make_client(Some(10), None);
        let usage = 95 * BYTES_PER_GB / 10; // 9.5 GiB
        assert_eq!(evaluate(&client, usage, now()), Verdict::Keep);
    }

    #[test]
    fn test_quota_boundary_is_inclusive() {
        let client = make_client(Some(10), None);
        assert_eq!(
            evaluate(&client, 10 * BYTES_PER_GB - 1, now()),
            Verdict::Keep
        );
        assert_eq!(
            evaluate(&client, 10 * BYTES_PER_GB, now()),
            Verdict::SuspendTrafficExceeded
        );
    }

    #[test]
    fn test_expired_client() {
        let client = make_client(None, Some(now() - Duration::days(1)));
        assert_eq!(evaluate(&client, 0, now()), Verdict::SuspendExpired);
    }

    #[test]
    fn test_expiry_exactly_now_is_kept() {
        let client = make_client(None, Some(now()));
        assert_eq!(evaluate(&client, 0, now()), Verdict::Keep);
    }

    #[test]
    fn test_expiry_wins_over_traffic() {
        let client = make_client(Some(1), Some(now() - Duration::hours(1)));
        let verdict = evaluate(&client, 50 * BYTES_PER_GB, now());
        assert_eq!(verdict, Verdict::SuspendExpired);
        assert_eq!(verdict.disabled_reason(), Some(DisabledReason::Expired));
    }

    #[test]
    fn test_verdict_reasons() {
        assert_eq!(Verdict::Keep.disabled_reason(), None);
        assert!(!Verdict::Keep.suspends());
        assert_eq!(
            Verdict::SuspendTrafficExceeded.disabled_reason(),
            Some(DisabledReason::TrafficExceeded)
        );
        assert!(Verdict::SuspendTrafficExceeded.suspends());
    }
}
