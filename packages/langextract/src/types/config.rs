//! Configuration types for the pipeline, alignment, gateway, and batches.
//!
//! Every config deserializes with defaults for missing fields, so hosts can
//! load partial configs from whatever file format they use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to settle grounded extractions whose spans overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    /// Retain the higher-confidence member of each overlapping pair.
    #[default]
    KeepHighestConfidence,

    /// Retain the longer interval.
    KeepLongest,

    /// Retain the earliest start.
    KeepFirst,

    /// Union overlapping spans into one extraction.
    MergeOverlapping,
}

/// Configuration for the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Provider retries per target when the request doesn't set one.
    ///
    /// Default: 2.
    pub default_retry_count: u32,

    /// Passes when the request doesn't set one and multi-pass is off.
    ///
    /// Default: 1.
    pub default_pass_count: u32,

    /// Pick the pass count from document length when the request doesn't.
    ///
    /// Default: false.
    pub multi_pass: bool,

    /// Stop further passes once the share of new extractions in a pass
    /// drops below this ratio.
    ///
    /// Default: 0.1.
    pub improvement_threshold: f64,

    /// Run the aggregation stage at all.
    ///
    /// Default: true.
    pub enable_deduplication: bool,

    /// Default: keep highest confidence.
    pub overlap_strategy: OverlapStrategy,

    /// Extractions with a confidence below this are dropped.
    ///
    /// Default: 0.5.
    pub confidence_threshold: f64,

    /// Split documents longer than this many bytes into chunks.
    ///
    /// Default: None (one call per pass).
    pub max_char_buffer: Option<usize>,

    pub alignment: AlignmentOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_retry_count: 2,
            default_pass_count: 1,
            multi_pass: false,
            improvement_threshold: 0.1,
            enable_deduplication: true,
            overlap_strategy: OverlapStrategy::default(),
            confidence_threshold: 0.5,
            max_char_buffer: None,
            alignment: AlignmentOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable length-based pass selection.
    pub fn with_multi_pass(mut self, enabled: bool) -> Self {
        self.multi_pass = enabled;
        self
    }

    /// Set the early-stop ratio for extra passes.
    pub fn with_improvement_threshold(mut self, threshold: f64) -> Self {
        self.improvement_threshold = threshold;
        self
    }

    /// Enable or disable the aggregation stage.
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.enable_deduplication = enabled;
        self
    }

    /// Set the overlap strategy.
    pub fn with_overlap_strategy(mut self, strategy: OverlapStrategy) -> Self {
        self.overlap_strategy = strategy;
        self
    }

    /// Set the confidence threshold.
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Chunk documents longer than `max` bytes.
    pub fn with_max_char_buffer(mut self, max: usize) -> Self {
        self.max_char_buffer = Some(max);
        self
    }

    /// Set alignment options.
    pub fn with_alignment(mut self, alignment: AlignmentOptions) -> Self {
        self.alignment = alignment;
        self
    }
}

/// Options for the text alignment engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentOptions {
    /// Exact matching respects case.
    ///
    /// Default: true.
    pub case_sensitive: bool,

    /// Fuzzy level: fold case.
    pub fold_case: bool,

    /// Fuzzy level: collapse whitespace runs.
    pub collapse_whitespace: bool,

    /// Fuzzy level: drop punctuation.
    pub strip_punctuation: bool,

    /// Fall back to edit-distance matching.
    pub enable_approximate: bool,

    /// Largest accepted edit distance as a fraction of the extraction's
    /// length. Also sets how far window lengths may stray from it.
    ///
    /// Default: 0.25.
    pub max_distance: f64,

    /// Characters on each side of a position hint to search.
    ///
    /// Default: 2000.
    pub window_size: usize,

    /// Approximate matches scoring below this fraction are rejected.
    ///
    /// Default: 0.6.
    pub min_confidence: f64,

    /// Budget for one alignment attempt.
    ///
    /// Default: 1000.
    pub timeout_ms: u64,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            fold_case: true,
            collapse_whitespace: true,
            strip_punctuation: true,
            enable_approximate: true,
            max_distance: 0.25,
            window_size: 2000,
            min_confidence: 0.6,
            timeout_ms: 1000,
        }
    }
}

impl AlignmentOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept verbatim matches.
    pub fn exact_only() -> Self {
        Self {
            fold_case: false,
            collapse_whitespace: false,
            strip_punctuation: false,
            enable_approximate: false,
            ..Self::default()
        }
    }

    /// Set case sensitivity of exact matching.
    pub fn with_case_sensitive(mut self, sensitive: bool) -> Self {
        self.case_sensitive = sensitive;
        self
    }

    /// Set the maximum normalized edit distance.
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Set the hint window size.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Set the minimum approximate-match confidence.
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Set the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enable or disable approximate matching.
    pub fn with_approximate(mut self, enabled: bool) -> Self {
        self.enable_approximate = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the provider gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// First retry delay; doubles per attempt.
    ///
    /// Default: 200.
    pub backoff_base_ms: u64,

    /// Ceiling on any single retry delay.
    ///
    /// Default: 5000.
    pub backoff_max_ms: u64,

    /// Per-attempt timeout, further capped by the request deadline.
    ///
    /// Default: 60000.
    pub call_timeout_ms: u64,

    /// Consecutive failures after which a provider reports unhealthy.
    ///
    /// Default: 3.
    pub unhealthy_after: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            call_timeout_ms: 60_000,
            unhealthy_after: 3,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backoff base and ceiling.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Configuration for batch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Requests in flight at once.
    ///
    /// Default: 4.
    pub concurrency: usize,

    /// Stop submitting once more than this many requests failed.
    ///
    /// Default: None (never stop).
    pub max_errors: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_errors: None,
        }
    }
}

impl BatchConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the error threshold.
    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = Some(max_errors);
        self
    }
}
