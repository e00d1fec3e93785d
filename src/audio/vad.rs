//! Voice-activity cleaning
//!
//! The acoustic VAD produces raw frame-level speech intervals; this module
//! turns them into the disjoint second-based intervals the rest of the
//! pipeline consumes. The model itself sits behind [`VadBackend`].

use async_trait::async_trait;
use tracing::debug;

use crate::audio::types::{RawVadOutput, SpeechInterval, SAMPLE_RATE};
use crate::config::SegmentationParams;
use crate::error::BackendError;

/// Acoustic VAD backend: waveform in, raw speech intervals out.
#[async_trait]
pub trait VadBackend: Send + Sync {
    async fn segment(
        &self,
        waveform: &[f32],
        sample_rate: u32,
    ) -> Result<RawVadOutput, BackendError>;
}

/// Cleans raw VAD intervals under the three segmentation constraints:
/// adjacent intervals separated by less than `min_silence_ms` are merged
/// (an incomplete interval is always merged into its successor), merged
/// intervals shorter than `min_speech_ms` are dropped, and survivors are
/// padded by `pad_ms`, clamped to the audio, and kept disjoint.
pub fn clean_speech_intervals(
    raw: &RawVadOutput,
    params: &SegmentationParams,
    audio_samples: u64,
) -> Vec<SpeechInterval> {
    let min_silence = ms_to_samples(params.min_silence_ms);
    let min_speech = ms_to_samples(params.min_speech_ms);
    let pad = ms_to_samples(params.pad_ms);

    let mut ordered: Vec<(usize, (u64, u64))> =
        raw.intervals.iter().copied().enumerate().collect();
    ordered.sort_by_key(|(_, (start, _))| *start);

    // Merge pass. `carry_incomplete` bridges an interval the model truncated
    // mid-speech into its successor regardless of the gap.
    let mut merged: Vec<(u64, u64)> = Vec::new();
    let mut carry_incomplete = false;
    for (orig_idx, (start, end)) in ordered {
        let complete = raw.is_complete.get(orig_idx).copied().unwrap_or(true);
        match merged.last_mut() {
            Some(last) if carry_incomplete || start.saturating_sub(last.1) < min_silence => {
                last.1 = last.1.max(end);
            }
            _ => merged.push((start, end)),
        }
        carry_incomplete = !complete;
    }

    let kept = merged
        .into_iter()
        .filter(|(start, end)| end.saturating_sub(*start) >= min_speech);

    let mut intervals: Vec<SpeechInterval> = Vec::new();
    let mut prev_end = 0u64;
    for (start, end) in kept {
        let padded_start = start.saturating_sub(pad).max(prev_end);
        let padded_end = (end + pad).min(audio_samples);
        if padded_end <= padded_start {
            continue;
        }
        prev_end = padded_end;
        intervals.push(SpeechInterval {
            start: padded_start as f64 / SAMPLE_RATE as f64,
            end: padded_end as f64 / SAMPLE_RATE as f64,
        });
    }

    debug!(
        raw = raw.intervals.len(),
        cleaned = intervals.len(),
        "VAD intervals cleaned"
    );
    intervals
}

fn ms_to_samples(ms: u32) -> u64 {
    ms as u64 * SAMPLE_RATE as u64 / 1000
}
