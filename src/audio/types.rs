//! Audio-side type definitions
//!
//! The pipeline operates on 16 kHz mono f32 waveforms; times are seconds at
//! the external boundary, sample indices internally.

use serde::{Deserialize, Serialize};

/// Sample rate every backend operates at.
pub const SAMPLE_RATE: u32 = 16_000;

/// Raw frame-level output of the acoustic VAD: speech intervals in samples
/// plus a per-interval completeness flag (false when the model cut the
/// interval at an inference-chunk boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVadOutput {
    pub intervals: Vec<(u64, u64)>,
    pub is_complete: Vec<bool>,
}

/// A cleaned, disjoint speech interval in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechInterval {
    pub start: f64,
    pub end: f64,
}

impl SpeechInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One ASR-transcribed speech segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSegment {
    pub index: u32,
    pub start_time: f64,
    pub end_time: f64,
    /// CTC-collapsed phoneme list; may be empty for very short clips.
    pub phonemes: Vec<String>,
}

impl AsrSegment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}
