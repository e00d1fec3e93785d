//! Fused-segment post-split
//!
//! The state machine can emit segments that cover two logical utterances:
//! an inter-chapter "Isti'adha+Basmala" pair, or a Basmala/Isti'adha fused
//! with the first verse. This pass splits them into separate outputs. Word
//! boundaries come from an external forced aligner when one is available;
//! otherwise combined specials split at their midpoint and fused
//! prefix+verse segments are kept as-is.

use async_trait::async_trait;

use tracing::{debug, warn};

use crate::align::special::{SpecialKind, BASMALA_TEXT, ISTIADHA_TEXT};
use crate::align::types::{AlignmentReport, SegmentOutput};
use crate::audio::types::SAMPLE_RATE;
use crate::error::BackendError;

/// Word count of each invocation (for locating split boundaries).
const ISTIADHA_WORDS: usize = 5;
const BASMALA_WORDS: usize = 4;

/// One word timing from the forced aligner, relative to the clip start.
/// `location` uses `0:0:<n>` for the n-th word of a special prefix.
#[derive(Debug, Clone)]
pub struct WordTiming {
    pub location: String,
    pub start: f64,
    pub end: f64,
}

/// External forced-alignment service (timestamp refinement only).
#[async_trait]
pub trait ForcedAligner: Send + Sync {
    /// Word timings per clip; `None` entries mark clips that failed to align.
    async fn word_timestamps(
        &self,
        clips: &[Vec<f32>],
        sample_rate: u32,
        transcripts: &[String],
    ) -> Result<Vec<Option<Vec<WordTiming>>>, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FusedCase {
    Combined,
    BasmalaVerse,
    IstiadhaVerse,
}

/// Splits combined and fused segments in the report, remapping the merge
/// map indices to the post-split numbering.
pub async fn split_fused_segments(
    report: &mut AlignmentReport,
    waveform: &[f32],
    aligner: Option<&dyn ForcedAligner>,
) {
    let candidates: Vec<(usize, FusedCase)> = report
        .segments
        .iter()
        .enumerate()
        .filter_map(|(idx, segment)| classify(segment).map(|case| (idx, case)))
        .collect();
    if candidates.is_empty() {
        return;
    }
    debug!(count = candidates.len(), "fused segments to split");

    // One forced-alignment call for all candidates.
    let mut timings: Vec<Option<Vec<WordTiming>>> = vec![None; candidates.len()];
    if let Some(aligner) = aligner {
        let clips: Vec<Vec<f32>> = candidates
            .iter()
            .map(|&(idx, _)| clip_samples(waveform, &report.segments[idx]))
            .collect();
        let transcripts: Vec<String> = candidates
            .iter()
            .map(|&(idx, _)| report.segments[idx].matched_text.clone())
            .collect();
        match aligner
            .word_timestamps(&clips, SAMPLE_RATE, &transcripts)
            .await
        {
            Ok(results) if results.len() == candidates.len() => timings = results,
            Ok(_) | Err(_) => {
                warn!("forced aligner unavailable for fused splits, using fallbacks")
            }
        }
    }

    let mut outputs: Vec<SegmentOutput> = Vec::with_capacity(report.segments.len() + 2);
    let mut index_map: Vec<u32> = Vec::with_capacity(report.segments.len());
    let mut candidate_cursor = 0;

    for (idx, segment) in report.segments.iter().enumerate() {
        index_map.push(outputs.len() as u32);
        let is_candidate = candidate_cursor < candidates.len()
            && candidates[candidate_cursor].0 == idx;
        if !is_candidate {
            outputs.push(segment.clone());
            continue;
        }
        let (_, case) = candidates[candidate_cursor];
        let words = timings[candidate_cursor].as_deref();
        candidate_cursor += 1;
        split_one(segment, case, words, &mut outputs);
    }

    report.merged_into = report
        .merged_into
        .iter()
        .map(|(&consumed, &target)| {
            (
                index_map[consumed as usize],
                index_map[target as usize],
            )
        })
        .collect();
    report.segments = outputs;
}

fn classify(segment: &SegmentOutput) -> Option<FusedCase> {
    if segment.matched_ref == SpecialKind::Combined.label() {
        return Some(FusedCase::Combined);
    }
    if segment.matched_ref.contains(':') {
        if segment.matched_text.starts_with(BASMALA_TEXT) {
            return Some(FusedCase::BasmalaVerse);
        }
        if segment.matched_text.starts_with(ISTIADHA_TEXT) {
            return Some(FusedCase::IstiadhaVerse);
        }
    }
    None
}

fn clip_samples(waveform: &[f32], segment: &SegmentOutput) -> Vec<f32> {
    let start = (segment.start_time * SAMPLE_RATE as f64).round() as usize;
    let end = ((segment.end_time * SAMPLE_RATE as f64).round() as usize).min(waveform.len());
    waveform.get(start..end).map(<[f32]>::to_vec).unwrap_or_default()
}

/// End time of the word at `0:0:<word_num>`, absolute.
fn boundary_after_word(
    words: Option<&[WordTiming]>,
    word_num: usize,
    clip_start: f64,
) -> Option<f64> {
    let location = format!("0:0:{word_num}");
    words?
        .iter()
        .find(|w| w.location == location)
        .map(|w| clip_start + w.end)
}

fn special_output(
    kind: SpecialKind,
    start: f64,
    end: f64,
    confidence: f64,
) -> SegmentOutput {
    SegmentOutput {
        start_time: start,
        end_time: end,
        transcribed_text: String::new(),
        matched_text: kind.text(),
        matched_ref: kind.label().to_string(),
        confidence,
        error: None,
        has_missing_words: false,
        potentially_undersegmented: false,
    }
}

fn split_one(
    segment: &SegmentOutput,
    case: FusedCase,
    words: Option<&[WordTiming]>,
    outputs: &mut Vec<SegmentOutput>,
) {
    match case {
        FusedCase::Combined => {
            let boundary =
                boundary_after_word(words, ISTIADHA_WORDS, segment.start_time)
                    .unwrap_or((segment.start_time + segment.end_time) / 2.0);
            outputs.push(special_output(
                SpecialKind::Istiadha,
                segment.start_time,
                boundary,
                segment.confidence,
            ));
            outputs.push(special_output(
                SpecialKind::Basmala,
                boundary,
                segment.end_time,
                segment.confidence,
            ));
        }
        FusedCase::BasmalaVerse => {
            let Some(boundary) =
                boundary_after_word(words, BASMALA_WORDS, segment.start_time)
            else {
                // Without a trustworthy boundary the fused segment stays.
                outputs.push(segment.clone());
                return;
            };
            let verse_text = segment
                .matched_text
                .strip_prefix(BASMALA_TEXT)
                .unwrap_or(&segment.matched_text)
                .trim_start()
                .to_string();
            outputs.push(special_output(
                SpecialKind::Basmala,
                segment.start_time,
                boundary,
                segment.confidence,
            ));
            let mut verse = segment.clone();
            verse.start_time = boundary;
            verse.matched_text = verse_text;
            outputs.push(verse);
        }
        FusedCase::IstiadhaVerse => {
            let Some(boundary) =
                boundary_after_word(words, ISTIADHA_WORDS, segment.start_time)
            else {
                outputs.push(segment.clone());
                return;
            };
            let verse_text = segment
                .matched_text
                .strip_prefix(ISTIADHA_TEXT)
                .unwrap_or(&segment.matched_text)
                .trim_start()
                .to_string();
            outputs.push(special_output(
                SpecialKind::Istiadha,
                segment.start_time,
                boundary,
                segment.confidence,
            ));
            let mut verse = segment.clone();
            verse.start_time = boundary;
            verse.matched_text = verse_text;
            outputs.push(verse);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::types::RunStats;
    use std::collections::HashMap;

    fn verse_segment(start: f64, end: f64, text: &str, matched_ref: &str) -> SegmentOutput {
        SegmentOutput {
            start_time: start,
            end_time: end,
            transcribed_text: String::new(),
            matched_text: text.to_string(),
            matched_ref: matched_ref.to_string(),
            confidence: 0.9,
            error: None,
            has_missing_words: false,
            potentially_undersegmented: false,
        }
    }

    fn report(segments: Vec<SegmentOutput>) -> AlignmentReport {
        AlignmentReport {
            segments,
            source_surah_hint: Some(1),
            warnings: Vec::new(),
            merged_into: HashMap::new(),
            stats: RunStats::default(),
        }
    }

    struct FixedAligner(Vec<Option<Vec<WordTiming>>>);

    #[async_trait]
    impl ForcedAligner for FixedAligner {
        async fn word_timestamps(
            &self,
            _clips: &[Vec<f32>],
            _sample_rate: u32,
            _transcripts: &[String],
        ) -> Result<Vec<Option<Vec<WordTiming>>>, BackendError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn combined_special_splits_at_midpoint_without_aligner() {
        let combined = verse_segment(2.0, 10.0, &SpecialKind::Combined.text(), "Isti'adha+Basmala");
        let mut rep = report(vec![combined, verse_segment(11.0, 15.0, "آية", "2:1:1-2:1:4")]);
        split_fused_segments(&mut rep, &[], None).await;

        assert_eq!(rep.segments.len(), 3);
        assert_eq!(rep.segments[0].matched_ref, "Isti'adha");
        assert_eq!(rep.segments[1].matched_ref, "Basmala");
        assert!((rep.segments[0].end_time - 6.0).abs() < 1e-9);
        assert_eq!(rep.segments[2].matched_ref, "2:1:1-2:1:4");
    }

    #[tokio::test]
    async fn fused_basmala_keeps_segment_without_aligner() {
        let text = format!("{BASMALA_TEXT} قُلْ هُوَ");
        let mut rep = report(vec![verse_segment(0.0, 8.0, &text, "112:1:1-112:1:2")]);
        split_fused_segments(&mut rep, &[], None).await;
        assert_eq!(rep.segments.len(), 1);
        assert_eq!(rep.segments[0].matched_text, text);
    }

    #[tokio::test]
    async fn fused_basmala_splits_with_aligner_boundary() {
        let text = format!("{BASMALA_TEXT} قُلْ هُوَ");
        let mut rep = report(vec![verse_segment(10.0, 18.0, &text, "112:1:1-112:1:2")]);
        let aligner = FixedAligner(vec![Some(vec![WordTiming {
            location: "0:0:4".into(),
            start: 2.0,
            end: 3.0,
        }])]);
        let waveform = vec![0.0f32; 18 * SAMPLE_RATE as usize];
        split_fused_segments(&mut rep, &waveform, Some(&aligner)).await;

        assert_eq!(rep.segments.len(), 2);
        assert_eq!(rep.segments[0].matched_ref, "Basmala");
        assert!((rep.segments[0].end_time - 13.0).abs() < 1e-9);
        assert_eq!(rep.segments[1].matched_text, "قُلْ هُوَ");
        assert!((rep.segments[1].start_time - 13.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn merge_map_indices_are_remapped() {
        let combined = verse_segment(0.0, 4.0, &SpecialKind::Combined.text(), "Isti'adha+Basmala");
        let mut rep = report(vec![
            combined,
            verse_segment(5.0, 9.0, "سَمِعَ", "Tahmeed"),
            verse_segment(9.5, 11.0, "", ""),
        ]);
        rep.merged_into.insert(2, 1);
        split_fused_segments(&mut rep, &[], None).await;

        // The combined split shifted everything after it by one.
        assert_eq!(rep.segments.len(), 4);
        assert_eq!(rep.merged_into.get(&3), Some(&2));
    }
}
