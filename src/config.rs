//! Configuration for every pipeline stage
//!
//! Defaults mirror the values the aligner ships with; hosts can override any
//! group before constructing an `AlignmentContext`.

use serde::{Deserialize, Serialize};

/// Which phoneme ASR model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsrModel {
    Base,
    Large,
}

impl Default for AsrModel {
    fn default() -> Self {
        AsrModel::Base
    }
}

/// Per-request segmentation parameters (the external surface of `align`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationParams {
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
    pub pad_ms: u32,
    pub asr_model: AsrModel,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            min_silence_ms: 200,
            min_speech_ms: 1000,
            pad_ms: 100,
            asr_model: AsrModel::Base,
        }
    }
}

/// ASR batching constraints.
///
/// Clips are sorted by ascending duration; a batch closes when adding the
/// next clip would push total seconds or padding waste past the limits,
/// but never below `min_batch_size` clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_batch_seconds: f64,
    pub max_pad_waste: f64,
    pub min_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_seconds: 120.0,
            max_pad_waste: 0.25,
            min_batch_size: 4,
        }
    }
}

/// DP matcher windows, thresholds and costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Words before the pointer included in the normal search window.
    pub lookback_words: usize,
    /// Words past the expected span included in the normal search window.
    pub lookahead_words: usize,
    /// Expanded window for retry tiers.
    pub retry_lookback_words: usize,
    pub retry_lookahead_words: usize,
    /// Normalised edit distance acceptance threshold.
    pub max_edit_distance: f64,
    /// Relaxed threshold for retry tier 2.
    pub max_edit_distance_relaxed: f64,
    /// Weight of the |start word − pointer| position prior.
    pub start_prior_weight: f64,
    pub cost_substitution: f64,
    pub cost_deletion: f64,
    pub cost_insertion: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            lookback_words: 10,
            lookahead_words: 5,
            retry_lookback_words: 80,
            retry_lookahead_words: 60,
            max_edit_distance: 0.25,
            max_edit_distance_relaxed: 0.5,
            start_prior_weight: 0.01,
            cost_substitution: 1.0,
            cost_deletion: 1.0,
            cost_insertion: 1.0,
        }
    }
}

/// Global anchor voting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// How many non-empty segments feed the vote.
    pub anchor_segments: usize,
    /// Surahs shortlisted by raw total weight before run evaluation.
    pub top_candidates: usize,
    /// Run edges below this fraction of the run's max ayah weight are trimmed.
    pub run_trim_ratio: f64,
    /// Weight votes by n-gram rarity (1/count) instead of 1.0.
    pub rarity_weighting: bool,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            anchor_segments: 5,
            top_candidates: 5,
            run_trim_ratio: 0.1,
            rarity_weighting: true,
        }
    }
}

/// Special-segment and transition-utterance thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialConfig {
    /// Normalised edit distance threshold for the opening invocations.
    pub special_threshold: f64,
    /// Looser threshold for liturgical transition utterances.
    pub transition_threshold: f64,
}

impl Default for SpecialConfig {
    fn default() -> Self {
        Self {
            special_threshold: 0.35,
            transition_threshold: 0.45,
        }
    }
}

/// Result assembly thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// A segment this long matching this many words is suspect.
    pub underseg_min_words: usize,
    pub underseg_min_ayah_span: usize,
    pub underseg_min_duration: f64,
    /// Confidence penalty when the recitation stops mid-ayah.
    pub final_segment_penalty: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            underseg_min_words: 25,
            underseg_min_ayah_span: 2,
            underseg_min_duration: 15.0,
            final_segment_penalty: 0.25,
        }
    }
}

/// Aggregate configuration for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignerConfig {
    pub batch: BatchConfig,
    pub matcher: MatcherConfig,
    pub anchor: AnchorConfig,
    pub special: SpecialConfig,
    pub report: ReportConfig,
    pub pipeline: PipelineConfig,
}

/// State-machine level knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Consecutive failed segments before a global re-anchor.
    pub max_consecutive_failures: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 2,
        }
    }
}
