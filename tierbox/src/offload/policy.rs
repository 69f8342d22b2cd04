//! Limits applied to background work.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a background task that runs too long.
///
/// Cancelling a write-behind task loses its store write, so
/// [`Cancel`](Self::Cancel) is mostly useful for reload-heavy engines whose
/// loaders may hang past `load_timeout`, e.g. inside a tier write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "after", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// No limit.
    #[default]
    None,
    /// Abort the task once it ran this long.
    Cancel(#[serde(with = "humantime_serde")] Duration),
    /// Let the task finish but log a warning once it ran this long.
    Warn(#[serde(with = "humantime_serde")] Duration),
}

/// Policy of the engine's [`OffloadManager`](super::OffloadManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Limit applied to every write-behind and reload task.
    pub timeout_policy: TimeoutPolicy,
    /// Refuse a second reload of a key whose previous reload is still
    /// running. Write-behind tasks are never deduplicated; superseded
    /// writes are skipped by version instead.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            timeout_policy: TimeoutPolicy::None,
            deduplicate: true,
        }
    }
}

impl OffloadConfig {
    /// Starts from the defaults: no timeout, reloads deduplicated.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder::default()
    }
}

/// Builder for [`OffloadConfig`].
#[derive(Debug, Clone, Default)]
pub struct OffloadConfigBuilder {
    config: OffloadConfig,
}

impl OffloadConfigBuilder {
    /// Sets the timeout policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Aborts tasks running longer than `limit`.
    pub fn timeout(self, limit: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(limit))
    }

    /// Logs tasks running longer than `limit`.
    pub fn warn_after(self, limit: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Warn(limit))
    }

    /// Enables or disables per-key deduplication of reloads.
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.deduplicate = enabled;
        self
    }

    /// Returns the configuration.
    pub fn build(self) -> OffloadConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_reads_from_yaml() {
        let config: OffloadConfig =
            serde_saphyr::from_str("timeout_policy:\n  policy: warn\n  after: 5s\n").unwrap();
        assert_eq!(
            config.timeout_policy,
            TimeoutPolicy::Warn(Duration::from_secs(5))
        );
        assert!(config.deduplicate);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = OffloadConfig::builder()
            .timeout(Duration::from_secs(30))
            .deduplicate(false)
            .build();
        assert_eq!(
            config.timeout_policy,
            TimeoutPolicy::Cancel(Duration::from_secs(30))
        );
        assert!(!config.deduplicate);
    }
}
