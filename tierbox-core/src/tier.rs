//! Cache tier identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two storage tiers of a multi-level cache.
///
/// Used to target writes explicitly and to report which tier served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    /// Fast in-process tier.
    L1,
    /// Shared remote tier.
    L2,
}

impl TierLevel {
    /// Returns the tier name used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TierLevel::L1 => "l1",
            TierLevel::L2 => "l2",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
