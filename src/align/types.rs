//! Alignment-side type definitions
//!
//! Per-segment results, the run report, and the counters the pipeline
//! accumulates while it walks the recitation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Accepted DP alignment for one segment, resolved to chapter word indices.
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub start_word_idx: u32,
    /// Inclusive.
    pub end_word_idx: u32,
    pub edit_cost: f64,
    /// `1 − norm_dist`, in `[0, 1]`.
    pub confidence: f64,
    /// Matched span in chapter flat-phoneme offsets.
    pub window_phone_start: u32,
    pub window_phone_end: u32,
    /// True when the match consumed part of a prepended Basmala prefix.
    pub basmala_consumed: bool,
    /// `surah:ayah:word[-surah:ayah:word]`.
    pub matched_ref: String,
}

/// One surfaced segment of the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentOutput {
    pub start_time: f64,
    pub end_time: f64,
    /// Space-joined ASR phonemes (diagnostic).
    pub transcribed_text: String,
    pub matched_text: String,
    /// Verse range ref, a special label ("Basmala", "Amin", ...), or empty.
    pub matched_ref: String,
    pub confidence: f64,
    pub error: Option<String>,
    pub has_missing_words: bool,
    pub potentially_undersegmented: bool,
}

impl SegmentOutput {
    /// Empty placeholder (used for segments absorbed by a merge).
    pub fn placeholder(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            transcribed_text: String::new(),
            matched_text: String::new(),
            matched_ref: String::new(),
            confidence: 0.0,
            error: None,
            has_missing_words: false,
            potentially_undersegmented: false,
        }
    }
}

/// Retry / re-anchor counters plus matched-segment distribution stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub segments_attempted: usize,
    pub segments_passed: usize,
    pub tier1_attempts: usize,
    pub tier1_passed: usize,
    pub tier2_attempts: usize,
    pub tier2_passed: usize,
    pub reanchors: usize,
    pub special_merges: usize,
    pub transition_skips: usize,
    pub words_per_minute: f64,
    pub avg_segment_duration: f64,
    pub std_segment_duration: f64,
    pub avg_pause_duration: f64,
    pub std_pause_duration: f64,
}

/// The full result of one alignment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub segments: Vec<SegmentOutput>,
    /// The surah the run anchored to, when it anchored at all.
    pub source_surah_hint: Option<u8>,
    pub warnings: Vec<String>,
    /// Segment index -> index of the segment that absorbed its audio.
    pub merged_into: HashMap<u32, u32>,
    pub stats: RunStats,
}
