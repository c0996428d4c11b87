use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// What `execute` does with a call that arrives while the circuit is open and the
// open duration has not yet elapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPolicy {
    // Run the action anyway; Open only drives bookkeeping and timing.
    #[default]
    CallThrough,
    // Skip the action and answer with the fallback or a rejection.
    Reject,
}

/// Breaker configuration. Fixed once the breaker is built.
///
/// Durations travel as milliseconds in JSON (`reset_timeout_ms` and friends).
/// The auto-close and open-duration knobs default to zero, which leaves a plain
/// failure/success threshold breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit open.
    pub failure_threshold: u32,
    /// How long a closed circuit may sit idle before the next call probes half-open.
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,
    /// Consecutive successes needed before a close is considered.
    pub success_threshold: u32,
    /// Level the auto-close counter must reach before a close. The counter is only
    /// ever zeroed (by failures and resets), so above 0 the close waits on
    /// `auto_close_duration`.
    pub auto_close_threshold: u32,
    /// Idle time after which a close is forced even below `auto_close_threshold`.
    #[serde(rename = "auto_close_duration_ms", with = "duration_ms")]
    pub auto_close_duration: Duration,
    /// How long to stay open before letting a half-open probe through.
    #[serde(rename = "open_duration_ms", with = "duration_ms")]
    pub open_duration: Duration,
    pub open_policy: OpenPolicy,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 3,
            auto_close_threshold: 0,
            auto_close_duration: Duration::ZERO,
            open_duration: Duration::ZERO,
            open_policy: OpenPolicy::CallThrough,
        }
    }
}

impl BreakerConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_auto_close_threshold(mut self, threshold: u32) -> Self {
        self.auto_close_threshold = threshold;
        self
    }

    pub fn with_auto_close_duration(mut self, duration: Duration) -> Self {
        self.auto_close_duration = duration;
        self
    }

    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    pub fn with_open_policy(mut self, policy: OpenPolicy) -> Self {
        self.open_policy = policy;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_auto_close() {
        let config = BreakerConfig::default();
        assert_eq!(config.auto_close_threshold, 0);
        assert_eq!(config.auto_close_duration, Duration::ZERO);
        assert_eq!(config.open_duration, Duration::ZERO);
        assert_eq!(config.open_policy, OpenPolicy::CallThrough);
    }

    #[test]
    fn test_builder() {
        let config = BreakerConfig::default()
            .with_failure_threshold(2)
            .with_reset_timeout(Duration::from_millis(100))
            .with_success_threshold(4)
            .with_auto_close_threshold(2)
            .with_auto_close_duration(Duration::from_millis(500))
            .with_open_duration(Duration::from_secs(1))
            .with_open_policy(OpenPolicy::Reject);

        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.reset_timeout, Duration::from_millis(100));
        assert_eq!(config.success_threshold, 4);
        assert_eq!(config.auto_close_threshold, 2);
        assert_eq!(config.auto_close_duration, Duration::from_millis(500));
        assert_eq!(config.open_duration, Duration::from_secs(1));
        assert_eq!(config.open_policy, OpenPolicy::Reject);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = BreakerConfig::from_json(
            r#"{
                "failure_threshold": 10,
                "reset_timeout_ms": 200,
                "open_duration_ms": 1000,
                "open_policy": "reject"
            }"#,
        )
        .unwrap();

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.reset_timeout, Duration::from_millis(200));
        assert_eq!(config.open_duration, Duration::from_secs(1));
        assert_eq!(config.open_policy, OpenPolicy::Reject);
        // untouched fields keep their defaults
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.auto_close_duration, Duration::ZERO);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(BreakerConfig::from_json("{ not json").is_err());
        assert!(BreakerConfig::from_json(r#"{"failure_threshold": -1}"#).is_err());
    }

    #[test]
    fn test_json_uses_millis() {
        let config = BreakerConfig::default().with_open_duration(Duration::from_millis(1500));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["open_duration_ms"], 1500);
        assert_eq!(value["reset_timeout_ms"], 60_000);
        assert_eq!(value["open_policy"], "call_through");

        let back: BreakerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }
}
