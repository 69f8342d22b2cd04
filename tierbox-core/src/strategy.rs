//! Cache strategy selection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Strategy governing the order and timing of cache and backing-store writes.
///
/// Exactly one strategy is active per engine. It is chosen at configuration
/// time; only the explicitly strategy-named engine operations override it per
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Persistent store, then L2, then L1, synchronously. Any failure aborts.
    WriteThrough,
    /// L1 and L2 immediately; the persistent store write is deferred.
    WriteBehind,
    /// Persistent store only; the cached copies are invalidated.
    WriteAround,
    /// L1 and L2 only; the caller persists separately.
    #[default]
    CacheAside,
    /// Tiers are populated by the load path on a miss.
    ReadThrough,
}

impl StrategyKind {
    /// Returns `true` if `set` under this strategy writes to the persistent store.
    pub const fn writes_store(&self) -> bool {
        matches!(
            self,
            StrategyKind::WriteThrough | StrategyKind::WriteBehind | StrategyKind::WriteAround
        )
    }

    /// Returns `true` if `set` under this strategy populates the cache tiers.
    pub const fn populates_tiers(&self) -> bool {
        !matches!(self, StrategyKind::WriteAround)
    }

    /// Returns the strategy name used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::WriteThrough => "write_through",
            StrategyKind::WriteBehind => "write_behind",
            StrategyKind::WriteAround => "write_around",
            StrategyKind::CacheAside => "cache_aside",
            StrategyKind::ReadThrough => "read_through",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_snake_case() {
        let kind: StrategyKind = serde_json::from_str("\"write_behind\"").unwrap();
        assert_eq!(kind, StrategyKind::WriteBehind);
        assert_eq!(StrategyKind::default(), StrategyKind::CacheAside);
    }

    #[test]
    fn store_and_tier_participation() {
        assert!(StrategyKind::WriteAround.writes_store());
        assert!(!StrategyKind::WriteAround.populates_tiers());
        assert!(!StrategyKind::CacheAside.writes_store());
        assert!(StrategyKind::ReadThrough.populates_tiers());
    }
}
