//! Traffic usage values and their display helpers.
//!
//! Counters come from the proxy and are cumulative for the lifetime of a
//! credential; nothing here resets them.

use crate::registry::model::BYTES_PER_GB;
use serde::{Deserialize, Serialize};

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

/// Point-in-time traffic counters for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Bytes sent by the client.
    pub uplink: u64,

    /// Bytes received by the client.
    pub downlink: u64,
}

impl Usage {
    /// Create usage from both directions.
    pub fn new(uplink: u64, downlink: u64) -> Self {
        Self { uplink, downlink }
    }

    /// Uplink plus downlink.
    pub fn total(&self) -> u64 {
        self.uplink.saturating_add(self.downlink)
    }

    /// Whether both counters are zero.
    pub fn is_zero(&self) -> bool {
        self.uplink == 0 && self.downlink == 0
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, other: Usage) -> Usage {
        Usage {
            uplink: self.uplink.saturating_add(other.uplink),
            downlink: self.downlink.saturating_add(other.downlink),
        }
    }
}

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= BYTES_PER_GB {
        format!("{:.2} GB", bytes as f64 / BYTES_PER_GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Share of a GiB quota consumed, clamped to 100.
pub fn quota_percent(used_bytes: u64, quota_gb: u64) -> u8 {
    let limit = quota_gb.saturating_mul(BYTES_PER_GB);
    if limit == 0 {
        return 0;
    }
    let percent = (used_bytes as u128 * 100) / limit as u128;
    percent.min(100) as u8
}

/// Ten-cell progress bar for a percentage.
pub fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100) / 10);
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(300, 700);
        assert_eq!(usage.total(), 1000);
        assert!(!usage.is_zero());
        assert!(Usage::default().is_zero());
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = Usage::new(u64::MAX, 1);
        assert_eq!(usage.total(), u64::MAX);
    }

    #[test]
    fn test_usage_add() {
        let sum = Usage::new(1, 2) + Usage::new(10, 20);
        assert_eq!(sum, Usage::new(11, 22));
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2 KB");
        assert_eq!(format_bytes(3 * 1_048_576 + 104_858), "3.1 MB");
        assert_eq!(format_bytes(5 * 1_073_741_824), "5.00 GB");
    }

    #[test]
    fn test_quota_percent() {
        assert_eq!(quota_percent(0, 10), 0);
        assert_eq!(quota_percent(5 * 1_073_741_824, 10), 50);
        assert_eq!(quota_percent(50 * 1_073_741_824, 10), 100);
        assert_eq!(quota_percent(1, 0), 0);
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0), "░░░░░░░░░░");
        assert_eq!(progress_bar(47), "████░░░░░░");
        assert_eq!(progress_bar(100), "██████████");
    }
}
