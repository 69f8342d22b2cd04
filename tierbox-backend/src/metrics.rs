//! Tier and codec metrics.
//!
//! Emitted through the `metrics` facade when the `metrics` feature is on.
//! Without it every function here compiles down to nothing.
//!
//! | name | kind | labels |
//! |------|------|--------|
//! | `tierbox_tier_read_total` | counter | `tier` |
//! | `tierbox_tier_read_duration_seconds` | histogram | `tier` |
//! | `tierbox_tier_read_errors_total` | counter | `tier` |
//! | `tierbox_tier_write_total` | counter | `tier` |
//! | `tierbox_tier_write_duration_seconds` | histogram | `tier` |
//! | `tierbox_tier_write_bytes_total` | counter | `tier` |
//! | `tierbox_tier_write_errors_total` | counter | `tier` |
//! | `tierbox_codec_{stage}_duration_seconds` | histogram | `codec` |

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

/// Measures a tier or codec call.
///
/// Holds nothing without the `metrics` feature.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Time since [`Timer::new`], always zero without the feature.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// A step of [`Codec`](crate::Codec) encoding or decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    Serialize,
    Compress,
    Decompress,
    Deserialize,
}

impl CodecStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serialize => "serialize",
            Self::Compress => "compress",
            Self::Decompress => "decompress",
            Self::Deserialize => "deserialize",
        }
    }
}

#[cfg(feature = "metrics")]
fn described_counter(name: &'static str, description: &'static str) -> &'static str {
    metrics::describe_counter!(name, description);
    name
}

#[cfg(feature = "metrics")]
fn described_histogram(name: &'static str, description: &'static str) -> &'static str {
    metrics::describe_histogram!(name, metrics::Unit::Seconds, description);
    name
}

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref TIER_READ_TOTAL: &'static str =
        described_counter("tierbox_tier_read_total", "Reads issued to a tier.");
    pub static ref TIER_READ_DURATION: &'static str = described_histogram(
        "tierbox_tier_read_duration_seconds",
        "Time spent in a tier read, excluding decoding."
    );
    pub static ref TIER_READ_ERRORS: &'static str =
        described_counter("tierbox_tier_read_errors_total", "Tier reads that failed.");
    pub static ref TIER_WRITE_TOTAL: &'static str =
        described_counter("tierbox_tier_write_total", "Writes issued to a tier.");
    pub static ref TIER_WRITE_DURATION: &'static str = described_histogram(
        "tierbox_tier_write_duration_seconds",
        "Time spent in a tier write, excluding encoding."
    );
    pub static ref TIER_WRITE_BYTES: &'static str = described_counter(
        "tierbox_tier_write_bytes_total",
        "Encoded bytes handed to a tier."
    );
    pub static ref TIER_WRITE_ERRORS: &'static str =
        described_counter("tierbox_tier_write_errors_total", "Tier writes that failed.");
    static ref CODEC_DURATIONS: [&'static str; 4] = [
        described_histogram(
            "tierbox_codec_serialize_duration_seconds",
            "Time spent serializing a value."
        ),
        described_histogram(
            "tierbox_codec_compress_duration_seconds",
            "Time spent compressing a serialized value."
        ),
        described_histogram(
            "tierbox_codec_decompress_duration_seconds",
            "Time spent decompressing a stored payload."
        ),
        described_histogram(
            "tierbox_codec_deserialize_duration_seconds",
            "Time spent deserializing a payload."
        ),
    ];
}

#[inline]
pub fn record_read(tier: &str, duration: Duration) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(*TIER_READ_TOTAL, "tier" => tier.to_string()).increment(1);
        metrics::histogram!(*TIER_READ_DURATION, "tier" => tier.to_string())
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (tier, duration);
}

#[inline]
pub fn record_read_error(tier: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*TIER_READ_ERRORS, "tier" => tier.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = tier;
}

/// Counts a successful write of `bytes` encoded bytes.
#[inline]
pub fn record_write(tier: &str, duration: Duration, bytes: usize) {
    #[cfg(feature = "metrics")]
    {
        let label = tier.to_string();
        metrics::counter!(*TIER_WRITE_TOTAL, "tier" => label.clone()).increment(1);
        metrics::counter!(*TIER_WRITE_BYTES, "tier" => label.clone()).increment(bytes as u64);
        metrics::histogram!(*TIER_WRITE_DURATION, "tier" => label)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (tier, duration, bytes);
}

#[inline]
pub fn record_write_error(tier: &str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*TIER_WRITE_ERRORS, "tier" => tier.to_string()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = tier;
}

/// Records one codec step. `codec` is the format or compressor name.
#[inline]
pub fn record_codec(stage: CodecStage, codec: &str, duration: Duration) {
    #[cfg(feature = "metrics")]
    {
        let name = CODEC_DURATIONS[stage as usize];
        metrics::histogram!(name, "codec" => codec.to_string()).record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (stage, codec, duration);
}
