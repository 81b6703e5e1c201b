//! Per-client traffic counters from the running proxy.
//!
//! Queries are best effort. A failed query reads as zero usage, which
//! callers must treat as "no new information" rather than as confirmed
//! zero traffic.

use crate::meter::usage::Usage;
use crate::proxy::command::CommandRunner;
use crate::WardenError;
use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Source of cumulative per-label traffic counters.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Current counters for `label`.
    ///
    /// Never fails: any query error yields `Usage::default()`.
    async fn get_usage(&self, label: &str) -> Usage;
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    stat: Vec<StatEntry>,
}

#[derive(Debug, Deserialize)]
struct StatEntry {
    name: String,
    #[serde(default, deserialize_with = "counter_from_number_or_string")]
    value: u64,
}

/// The API prints int64 counters as JSON strings; older builds print numbers.
fn counter_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("invalid counter: {}", n))),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("invalid counter: {}", other))),
    }
}

/// Counter pattern for one label.
pub fn stats_pattern(label: &str) -> String {
    format!("user>>>{}>>>traffic>>>", label)
}

/// Parse `xray api statsquery` output into usage.
///
/// An empty response or an empty `stat` list is zero usage.
pub fn parse_stats_output(label: &str, output: &str) -> Result<Usage, WardenError> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Usage::default());
    }

    let response: StatsResponse = serde_json::from_str(output)
        .map_err(|e| WardenError::StatsQuery(format!("Unparsable stats output: {}", e)))?;

    let prefix = stats_pattern(label);
    let mut usage = Usage::default();
    for entry in response.stat {
        match entry.name.strip_prefix(prefix.as_str()) {
            Some("uplink") => usage.uplink = usage.uplink.saturating_add(entry.value),
            Some("downlink") => usage.downlink = usage.downlink.saturating_add(entry.value),
            _ => {}
        }
    }
    Ok(usage)
}

/// Queries the Xray stats API through the `xray` CLI.
pub struct XrayStats {
    xray_binary: String,
    server: String,
    runner: Arc<dyn CommandRunner>,
}

impl XrayStats {
    /// Create a provider querying the stats API at `server`.
    pub fn new(xray_binary: String, server: String, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            xray_binary,
            server,
            runner,
        }
    }

    /// Query counters, surfacing failures.
    pub async fn query(&self, label: &str) -> Result<Usage, WardenError> {
        let args = vec![
            "api".to_string(),
            "statsquery".to_string(),
            format!("--server={}", self.server),
            "-pattern".to_string(),
            stats_pattern(label),
        ];

        let output = self
            .runner
            .run(&self.xray_binary, &args)
            .await
            .map_err(|e| WardenError::StatsQuery(e.to_string()))?;

        if !output.success {
            return Err(WardenError::StatsQuery(format!(
                "xray api exited with failure: {}",
                output.message()
            )));
        }

        parse_stats_output(label, &output.stdout)
    }
}

#[async_trait]
impl StatsProvider for XrayStats {
    async fn get_usage(&self, label: &str) -> Usage {
        match self.query(label).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(client = %label, error = %e, "stats query failed, treating as no new data");
                Usage::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::command::CommandOutput;

    struct FixedRunner(Result<CommandOutput, String>);

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput, WardenError> {
            self.0.clone().map_err(WardenError::Command)
        }
    }

    fn provider(result: Result<CommandOutput, String>) -> XrayStats {
        XrayStats::new(
            "xray".to_string(),
            "127.0.0.1:62789".to_string(),
            Arc::new(FixedRunner(result)),
        )
    }

    fn ok(stdout: &str) -> Result<CommandOutput, String> {
        Ok(CommandOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    #[test]
    fn test_parse_both_directions() {
        let output = r#"{"stat": [
            {"name": "user>>>alice>>>traffic>>>uplink", "value": 1200},
            {"name": "user>>>alice>>>traffic>>>downlink", "value": 3400}
        ]}"#;
        let usage = parse_stats_output("alice", output).unwrap();
        assert_eq!(usage, Usage::new(1200, 3400));
    }

    #[test]
    fn test_parse_string_encoded_counters() {
        let output = r#"{"stat": [
            {"name": "user>>>alice>>>traffic>>>uplink", "value": "2048"},
            {"name": "user>>>alice>>>traffic>>>downlink", "value": "10737418240"}
        ]}"#;
        let usage = parse_stats_output("alice", output).unwrap();
        assert_eq!(usage, Usage::new(2048, 10_737_418_240));

        assert!(matches!(
            parse_stats_output("alice", r#"{"stat":[{"name":"user>>>alice>>>traffic>>>uplink","value":"lots"}]}"#),
            Err(WardenError::StatsQuery(_))
        ));
    }

    #[test]
    fn test_parse_ignores_other_labels_and_missing_values() {
        let output = r#"{"stat": [
            {"name": "user>>>alice>>>traffic>>>uplink"},
            {"name": "user>>>alice2>>>traffic>>>downlink", "value": 99},
            {"name": "user>>>alice>>>traffic>>>downlink", "value": 7}
        ]}"#;
        let usage = parse_stats_output("alice", output).unwrap();
        assert_eq!(usage, Usage::new(0, 7));
    }

    #[test]
    fn test_parse_empty_output() {
        assert_eq!(parse_stats_output("bob", "").unwrap(), Usage::default());
        assert_eq!(parse_stats_output("bob", "{}").unwrap(), Usage::default());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            parse_stats_output("bob", "rpc error: connection refused"),
            Err(WardenError::StatsQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_get_usage_success() {
        let stats = provider(ok(
            r#"{"stat":[{"name":"user>>>bob>>>traffic>>>uplink","value":5}]}"#,
        ));
        assert_eq!(stats.get_usage("bob").await, Usage::new(5, 0));
    }

    #[tokio::test]
    async fn test_get_usage_absorbs_failures() {
        let failed_exit = provider(Ok(CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: "proxy not running".to_string(),
        }));
        assert!(failed_exit.query("bob").await.is_err());
        assert_eq!(failed_exit.get_usage("bob").await, Usage::default());

        let timed_out = provider(Err("xray timed out after 15s".to_string()));
        assert_eq!(timed_out.get_usage("bob").await, Usage::default());
    }
}
