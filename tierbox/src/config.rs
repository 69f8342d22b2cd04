//! Engine configuration.
//!
//! [`CacheConfig`] can be built in code or deserialized from YAML. Every
//! field has a default, so a document only lists what it changes:
//!
//! ```
//! use std::time::Duration;
//! use tierbox::config::CacheConfig;
//! use tierbox::StrategyKind;
//!
//! let config = CacheConfig::from_yaml(
//!     r#"
//! l1_max_entries: 500
//! l2_default_ttl: 10m
//! default_strategy: write_through
//! codec:
//!   format: bincode
//! "#,
//! )
//! .unwrap();
//! assert_eq!(config.l1_max_entries, 500);
//! assert_eq!(config.l2_default_ttl, Duration::from_secs(600));
//! assert_eq!(config.default_strategy, StrategyKind::WriteThrough);
//! ```

use std::sync::Arc;
use std::time::Duration;

use bounded_integer::bounded_integer;
use serde::{Deserialize, Serialize};
use tierbox_backend::{Codec, Compressor, Format, PassthroughCompressor};
use tierbox_core::StrategyKind;

use crate::CacheError;

bounded_integer! {
    /// Maximum number of reloads running at the same time (1-1024).
    #[repr(u16)]
    pub struct ReloadConcurrency { 1..=1024 }
}

impl ReloadConcurrency {
    fn default_limit() -> Self {
        ReloadConcurrency::new(10).unwrap_or(ReloadConcurrency::MIN)
    }
}

impl Default for ReloadConcurrency {
    fn default() -> Self {
        Self::default_limit()
    }
}

/// Compression applied to encoded values before they reach a tier.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Compression {
    /// Values are stored as encoded.
    #[default]
    Disabled,
    /// Gzip, requires the `gzip` feature.
    Gzip {
        /// Compression level, 0-9.
        #[serde(default = "default_gzip_level")]
        level: u32,
    },
    /// Zstandard, requires the `zstd` feature.
    Zstd {
        /// Compression level, 1-22.
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}

impl Compression {
    /// Converts the configured compression into a tier compressor.
    pub fn to_compressor(&self) -> Result<Arc<dyn Compressor>, CacheError> {
        match self {
            Compression::Disabled => Ok(Arc::new(PassthroughCompressor)),
            #[cfg(feature = "gzip")]
            Compression::Gzip { level } => {
                use tierbox_backend::GzipCompressor;
                Ok(Arc::new(GzipCompressor::with_level(*level)))
            }
            #[cfg(not(feature = "gzip"))]
            Compression::Gzip { .. } => Err(CacheError::InvalidConfiguration(
                "gzip compression requested but the 'gzip' feature is not enabled".to_owned(),
            )),
            #[cfg(feature = "zstd")]
            Compression::Zstd { level } => {
                use tierbox_backend::ZstdCompressor;
                Ok(Arc::new(ZstdCompressor::with_level(*level)))
            }
            #[cfg(not(feature = "zstd"))]
            Compression::Zstd { .. } => Err(CacheError::InvalidConfiguration(
                "zstd compression requested but the 'zstd' feature is not enabled".to_owned(),
            )),
        }
    }
}

/// Serialization and compression used for every cached value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CodecConfig {
    /// Serialization format.
    pub format: Format,
    /// Compression applied after serialization.
    pub compression: Compression,
}

impl CodecConfig {
    /// Builds the codec shared by both tiers.
    pub fn to_codec(&self) -> Result<Codec, CacheError> {
        Ok(Codec::new(self.format, self.compression.to_compressor()?))
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 capacity in entries.
    pub l1_max_entries: u64,
    /// L1 TTL used when the caller gives none.
    #[serde(with = "humantime_serde")]
    pub l1_default_ttl: Duration,
    /// Upper bound for any L1 TTL.
    #[serde(with = "humantime_serde")]
    pub l1_max_ttl: Duration,
    /// L2 TTL used when the caller gives none.
    #[serde(with = "humantime_serde")]
    pub l2_default_ttl: Duration,
    /// Number of L2 reads within `promotion_window` that copies a key into L1.
    pub promotion_threshold: u32,
    /// Sliding window for promotion counting.
    #[serde(with = "humantime_serde")]
    pub promotion_window: Duration,
    /// Collapse concurrent loads of the same key into one.
    pub stampede_prevention_enabled: bool,
    /// Reload scheduler tick.
    #[serde(with = "humantime_serde")]
    pub reload_poll_interval: Duration,
    /// Maximum number of reloads running at once.
    pub reload_max_concurrency: ReloadConcurrency,
    /// A non-forced manual reload only runs when the remaining TTL is at most
    /// `ttl * reload_threshold`.
    pub reload_threshold: f64,
    /// Strategy used by [`set`](crate::CacheEngine::set).
    pub default_strategy: StrategyKind,
    /// Delay before a write-behind value is persisted.
    #[serde(with = "humantime_serde")]
    pub write_behind_delay: Duration,
    /// Timeout applied to every backing-store load.
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,
    /// Timeout applied to every remote tier and persistent store call.
    #[serde(with = "humantime_serde")]
    pub remote_timeout: Duration,
    /// Dependency edge count that triggers a compaction pass.
    pub dependency_compaction_threshold: usize,
    /// Edges of keys not seen in any tier for this long are removed by
    /// compaction.
    #[serde(with = "humantime_serde")]
    pub dependency_grace_period: Duration,
    /// Value codec.
    pub codec: CodecConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 1000,
            l1_default_ttl: Duration::from_secs(5 * 60),
            l1_max_ttl: Duration::from_secs(30 * 60),
            l2_default_ttl: Duration::from_secs(60 * 60),
            promotion_threshold: 2,
            promotion_window: Duration::from_secs(60),
            stampede_prevention_enabled: true,
            reload_poll_interval: Duration::from_secs(1),
            reload_max_concurrency: ReloadConcurrency::default(),
            reload_threshold: 0.8,
            default_strategy: StrategyKind::default(),
            write_behind_delay: Duration::ZERO,
            load_timeout: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(2),
            dependency_compaction_threshold: 10_000,
            dependency_grace_period: Duration::from_secs(10 * 60),
            codec: CodecConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(source: &str) -> Result<Self, CacheError> {
        let config: CacheConfig = serde_saphyr::from_str(source)
            .map_err(|err| CacheError::InvalidConfiguration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), CacheError> {
        let invalid = |reason: &str| Err(CacheError::InvalidConfiguration(reason.to_owned()));
        if self.l1_max_entries == 0 {
            return invalid("l1_max_entries must be greater than zero");
        }
        if self.l1_default_ttl.is_zero() || self.l2_default_ttl.is_zero() {
            return invalid("default TTLs must be greater than zero");
        }
        if self.l1_default_ttl > self.l1_max_ttl {
            return invalid("l1_default_ttl must not exceed l1_max_ttl");
        }
        if self.promotion_window.is_zero() {
            return invalid("promotion_window must be greater than zero");
        }
        if self.reload_poll_interval.is_zero() {
            return invalid("reload_poll_interval must be greater than zero");
        }
        if !(self.reload_threshold > 0.0 && self.reload_threshold <= 1.0) {
            return invalid("reload_threshold must be in (0, 1]");
        }
        if self.load_timeout.is_zero() || self.remote_timeout.is_zero() {
            return invalid("timeouts must be greater than zero");
        }
        Ok(())
    }

    /// TTLs for L1 and L2, or `None` when the value must not be cached.
    ///
    /// A zero TTL means "do not cache". `None` selects the per-tier defaults.
    /// The L1 TTL is always clamped to `l1_max_ttl`.
    pub(crate) fn tier_ttls(&self, ttl: Option<Duration>) -> Option<(Duration, Duration)> {
        match ttl {
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) => Some((ttl.min(self.l1_max_ttl), ttl)),
            None => Some((
                self.l1_default_ttl.min(self.l1_max_ttl),
                self.l2_default_ttl,
            )),
        }
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set L1 capacity in entries.
    pub fn l1_max_entries(mut self, entries: u64) -> Self {
        self.config.l1_max_entries = entries;
        self
    }

    /// Set the default L1 TTL.
    pub fn l1_default_ttl(mut self, ttl: Duration) -> Self {
        self.config.l1_default_ttl = ttl;
        self
    }

    /// Set the upper bound for L1 TTLs.
    pub fn l1_max_ttl(mut self, ttl: Duration) -> Self {
        self.config.l1_max_ttl = ttl;
        self
    }

    /// Set the default L2 TTL.
    pub fn l2_default_ttl(mut self, ttl: Duration) -> Self {
        self.config.l2_default_ttl = ttl;
        self
    }

    /// Set the number of L2 reads that promotes a key into L1.
    pub fn promotion_threshold(mut self, threshold: u32) -> Self {
        self.config.promotion_threshold = threshold;
        self
    }

    /// Set the sliding window for promotion counting.
    pub fn promotion_window(mut self, window: Duration) -> Self {
        self.config.promotion_window = window;
        self
    }

    /// Enable or disable stampede prevention.
    pub fn stampede_prevention(mut self, enabled: bool) -> Self {
        self.config.stampede_prevention_enabled = enabled;
        self
    }

    /// Set the reload scheduler tick.
    pub fn reload_poll_interval(mut self, interval: Duration) -> Self {
        self.config.reload_poll_interval = interval;
        self
    }

    /// Set the maximum number of simultaneous reloads.
    pub fn reload_max_concurrency(mut self, limit: ReloadConcurrency) -> Self {
        self.config.reload_max_concurrency = limit;
        self
    }

    /// Set the freshness threshold for non-forced manual reloads.
    pub fn reload_threshold(mut self, threshold: f64) -> Self {
        self.config.reload_threshold = threshold;
        self
    }

    /// Set the active strategy.
    pub fn default_strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.default_strategy = strategy;
        self
    }

    /// Set the write-behind persistence delay.
    pub fn write_behind_delay(mut self, delay: Duration) -> Self {
        self.config.write_behind_delay = delay;
        self
    }

    /// Set the backing-store load timeout.
    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout = timeout;
        self
    }

    /// Set the remote tier and store call timeout.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    /// Set the dependency edge count that triggers compaction.
    pub fn dependency_compaction_threshold(mut self, edges: usize) -> Self {
        self.config.dependency_compaction_threshold = edges;
        self
    }

    /// Set the dependency compaction grace period.
    pub fn dependency_grace_period(mut self, grace: Duration) -> Self {
        self.config.dependency_grace_period = grace;
        self
    }

    /// Set the value codec.
    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.config.codec = codec;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<CacheConfig, CacheError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.l1_max_entries, 1000);
        assert_eq!(config.promotion_threshold, 2);
        assert_eq!(config.reload_max_concurrency.get(), 10);
        assert_eq!(config.default_strategy, StrategyKind::CacheAside);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_uses_humantime_and_keeps_defaults() {
        let config = CacheConfig::from_yaml(
            "l1_default_ttl: 90s\nreload_max_concurrency: 4\ncodec:\n  compression:\n    type: disabled\n",
        )
        .unwrap();
        assert_eq!(config.l1_default_ttl, Duration::from_secs(90));
        assert_eq!(config.reload_max_concurrency.get(), 4);
        assert_eq!(config.l2_default_ttl, Duration::from_secs(3600));
        assert_eq!(config.codec, CodecConfig::default());
    }

    #[test]
    fn out_of_range_concurrency_is_rejected() {
        assert!(CacheConfig::from_yaml("reload_max_concurrency: 0").is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = CacheConfig::builder().l1_max_entries(0).build().unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));

        assert!(
            CacheConfig::builder()
                .l1_default_ttl(Duration::from_secs(3600))
                .l1_max_ttl(Duration::from_secs(60))
                .build()
                .is_err()
        );
        assert!(CacheConfig::builder().reload_threshold(1.5).build().is_err());
        for zero_default in [
            CacheConfig::builder().l1_default_ttl(Duration::ZERO),
            CacheConfig::builder().l2_default_ttl(Duration::ZERO),
        ] {
            let err = zero_default.build().unwrap_err();
            assert!(matches!(err, CacheError::InvalidConfiguration(_)));
        }
        assert!(
            CacheConfig::builder()
                .load_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn zero_ttl_disables_caching_and_l1_is_clamped() {
        let config = CacheConfig::default();
        assert_eq!(config.tier_ttls(Some(Duration::ZERO)), None);
        assert_eq!(
            config.tier_ttls(Some(Duration::from_secs(7200))),
            Some((Duration::from_secs(1800), Duration::from_secs(7200)))
        );
        assert_eq!(
            config.tier_ttls(None),
            Some((Duration::from_secs(300), Duration::from_secs(3600)))
        );
    }

    #[cfg(not(feature = "gzip"))]
    #[test]
    fn disabled_compression_feature_is_a_configuration_error() {
        let err = Compression::Gzip { level: 6 }.to_compressor().unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));
    }
}
