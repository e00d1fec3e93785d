//! Result assembly
//!
//! Turns raw per-segment results into surfaced `SegmentOutput`s: rendered
//! Arabic text with end-of-ayah markers, confidence adjustments, quality
//! flags and run statistics.

use std::collections::{BTreeSet, HashMap};

use tracing::info;

use crate::align::pipeline::{MatchSpan, SegResult};
use crate::align::special::is_special_ref;
use crate::align::types::{AlignmentReport, RunStats, SegmentOutput};
use crate::audio::types::AsrSegment;
use crate::config::ReportConfig;
use crate::reference::script::VerseWordCounts;
use crate::reference::types::ChapterReference;

const ARABIC_DIGITS: [char; 10] = ['٠', '١', '٢', '٣', '٤', '٥', '٦', '٧', '٨', '٩'];

pub fn to_arabic_numeral(number: u16) -> String {
    number
        .to_string()
        .chars()
        .map(|d| ARABIC_DIGITS[d.to_digit(10).unwrap_or(0) as usize])
        .collect()
}

/// `U+06DD` plus the ayah number in Arabic-Indic digits.
pub fn verse_marker(ayah: u16) -> String {
    format!("\u{06DD}{}", to_arabic_numeral(ayah))
}

/// Concatenates the display text of an inclusive word range, inserting an
/// end-of-ayah marker after the last word of each ayah.
pub fn render_matched_text(
    chapter: &ChapterReference,
    start_word: usize,
    end_word: usize,
    counts: &VerseWordCounts,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    for idx in start_word..=end_word.min(chapter.num_words().saturating_sub(1)) {
        let word = &chapter.words[idx];
        parts.push(word.display_text.clone());
        let ayah_len = counts
            .get(&word.surah)
            .and_then(|c| c.get(&word.ayah))
            .copied()
            .unwrap_or(0);
        let is_last = if ayah_len > 0 {
            word.word_num >= ayah_len
        } else {
            chapter.is_ayah_end(idx)
        };
        if is_last {
            parts.push(verse_marker(word.ayah));
        }
    }
    parts.join(" ")
}

/// True when a range ref ends at the last word of its ayah.
pub fn is_end_of_verse(matched_ref: &str, counts: &VerseWordCounts) -> bool {
    let Some((surah, ayah, word)) = parse_end_ref(matched_ref) else {
        return false;
    };
    match counts.get(&surah).and_then(|c| c.get(&ayah)) {
        Some(&num_words) => word >= num_words,
        None => false,
    }
}

/// `(word_count, ayah_span)` for a range ref; `(0, 1)` when unparseable.
pub fn ref_word_stats(matched_ref: &str, counts: &VerseWordCounts) -> (usize, usize) {
    let Some(((s1, a1, w1), (s2, a2, w2))) = parse_range_ref(matched_ref) else {
        return (0, 1);
    };

    let ayah_span = if (s1, a1) == (s2, a2) {
        1
    } else if s1 == s2 {
        (a2 as i32 - a1 as i32).unsigned_abs() as usize + 1
    } else {
        2
    };

    let word_count = if (s1, a1) == (s2, a2) {
        (w2 as i32 - w1 as i32 + 1).max(0) as usize
    } else if s1 == s2 {
        let surah_counts = counts.get(&s1);
        let ayah_len = |a: u16| -> usize {
            surah_counts
                .and_then(|c| c.get(&a))
                .copied()
                .unwrap_or(0) as usize
        };
        let mut total = ayah_len(a1).saturating_sub(w1 as usize - 1);
        for a in (a1 + 1)..a2 {
            total += ayah_len(a);
        }
        total + w2 as usize
    } else {
        0
    };

    (word_count, ayah_span)
}

fn check_undersegmented(
    word_count: usize,
    ayah_span: usize,
    duration: f64,
    config: &ReportConfig,
) -> bool {
    duration >= config.underseg_min_duration
        && (word_count >= config.underseg_min_words
            || ayah_span >= config.underseg_min_ayah_span)
}

fn parse_end_ref(matched_ref: &str) -> Option<(u8, u16, u16)> {
    let end = matched_ref.rsplit('-').next()?;
    parse_single_ref(end)
}

fn parse_range_ref(matched_ref: &str) -> Option<((u8, u16, u16), (u8, u16, u16))> {
    match matched_ref.split_once('-') {
        Some((start, end)) => Some((parse_single_ref(start)?, parse_single_ref(end)?)),
        None => {
            let single = parse_single_ref(matched_ref)?;
            Some((single, single))
        }
    }
}

fn parse_single_ref(location: &str) -> Option<(u8, u16, u16)> {
    let mut parts = location.split(':');
    let surah = parts.next()?.parse().ok()?;
    let ayah = parts.next()?.parse().ok()?;
    let word = parts.next()?.parse().ok()?;
    Some((surah, ayah, word))
}

/// Assembles the final report from the state machine's raw output.
#[allow(clippy::too_many_arguments)]
pub fn assemble_report(
    segments: &[AsrSegment],
    results: &[SegResult],
    spans: &[Option<MatchSpan>],
    gap_segments: &BTreeSet<usize>,
    merged_into: &HashMap<usize, usize>,
    mut stats: RunStats,
    config: &ReportConfig,
    counts: &VerseWordCounts,
    source_surah_hint: Option<u8>,
    warnings: Vec<String>,
) -> AlignmentReport {
    debug_assert_eq!(segments.len(), results.len());

    // A merge extends the absorbing segment's audio to the end of the
    // consumed one.
    let mut extended_ends: HashMap<usize, f64> = HashMap::new();
    for (&consumed, &target) in merged_into {
        if let Some(segment) = segments.get(consumed) {
            extended_ends.insert(target, segment.end_time);
        }
    }

    let last_idx = segments.len().saturating_sub(1);
    let mut outputs: Vec<SegmentOutput> = Vec::with_capacity(segments.len());

    for (idx, (segment, result)) in segments.iter().zip(results).enumerate() {
        let end_time = extended_ends
            .get(&idx)
            .copied()
            .unwrap_or(segment.end_time);
        let is_merged_placeholder = merged_into.contains_key(&idx);

        let mut confidence = result.confidence;
        let mut matched_text = result.matched_text.clone();
        let mut matched_ref = result.matched_ref.clone();

        // A recitation that stops mid-ayah is suspect.
        if idx == last_idx
            && !matched_ref.is_empty()
            && !is_special_ref(&matched_ref)
            && !is_end_of_verse(&matched_ref, counts)
        {
            confidence = (confidence - config.final_segment_penalty).max(0.0);
        }

        let mut error = None;
        if confidence <= 0.0 && !is_merged_placeholder {
            matched_text.clear();
            matched_ref.clear();
            error = Some(format!("Low confidence ({:.0}%)", confidence * 100.0));
        }

        let duration = end_time - segment.start_time;
        let (word_count, ayah_span) = if is_special_ref(&matched_ref) {
            (0, 1)
        } else {
            ref_word_stats(&matched_ref, counts)
        };

        outputs.push(SegmentOutput {
            start_time: segment.start_time,
            end_time,
            transcribed_text: segment.phonemes.join(" "),
            matched_text,
            matched_ref,
            confidence,
            error,
            has_missing_words: gap_segments.contains(&idx),
            potentially_undersegmented: check_undersegmented(
                word_count, ayah_span, duration, config,
            ),
        });
    }

    fill_distribution_stats(&mut stats, &outputs, spans);
    info!(
        segments = outputs.len(),
        passed = stats.segments_passed,
        reanchors = stats.reanchors,
        "alignment report assembled"
    );

    AlignmentReport {
        segments: outputs,
        source_surah_hint,
        warnings,
        merged_into: merged_into
            .iter()
            .map(|(&k, &v)| (k as u32, v as u32))
            .collect(),
        stats,
    }
}

impl AlignmentReport {
    /// API-facing JSON: one record per segment with split start/end refs,
    /// times rounded to milliseconds and specials labelled separately.
    pub fn to_json(&self) -> serde_json::Value {
        let segments: Vec<serde_json::Value> = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let is_special = is_special_ref(&segment.matched_ref);
                let (ref_from, ref_to) = if is_special || segment.matched_ref.is_empty() {
                    (String::new(), String::new())
                } else {
                    match segment.matched_ref.split_once('-') {
                        Some((from, to)) => (from.to_string(), to.to_string()),
                        None => (segment.matched_ref.clone(), segment.matched_ref.clone()),
                    }
                };
                serde_json::json!({
                    "segment": i + 1,
                    "time_from": round3(segment.start_time),
                    "time_to": round3(segment.end_time),
                    "ref_from": ref_from,
                    "ref_to": ref_to,
                    "matched_text": segment.matched_text,
                    "confidence": round3(segment.confidence),
                    "has_missing_words": segment.has_missing_words,
                    "potentially_undersegmented": segment.potentially_undersegmented,
                    "special_type": if is_special {
                        serde_json::Value::String(segment.matched_ref.clone())
                    } else {
                        serde_json::Value::Null
                    },
                    "error": segment.error,
                })
            })
            .collect();
        serde_json::json!({ "segments": segments })
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn fill_distribution_stats(
    stats: &mut RunStats,
    outputs: &[SegmentOutput],
    spans: &[Option<MatchSpan>],
) {
    let matched: Vec<(&SegmentOutput, usize)> = outputs
        .iter()
        .zip(spans)
        .filter_map(|(output, span)| {
            span.as_ref().map(|s| {
                let words = (s.end_word - s.start_word + 1) as usize;
                (output, words)
            })
        })
        .collect();

    if matched.is_empty() {
        return;
    }

    let durations: Vec<f64> = matched
        .iter()
        .map(|(o, _)| o.end_time - o.start_time)
        .collect();
    let total_speech: f64 = durations.iter().sum();
    let total_words: usize = matched.iter().map(|(_, w)| w).sum();

    stats.words_per_minute = if total_speech > 0.0 {
        total_words as f64 / (total_speech / 60.0)
    } else {
        0.0
    };
    stats.avg_segment_duration = mean(&durations);
    stats.std_segment_duration = std_dev(&durations);

    let pauses: Vec<f64> = outputs
        .windows(2)
        .map(|pair| pair[1].start_time - pair[0].end_time)
        .filter(|&p| p > 0.0)
        .collect();
    stats.avg_pause_duration = mean(&pauses);
    stats.std_pause_duration = std_dev(&pauses);
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::types::{PhonemeVocab, Word};

    fn chapter() -> ChapterReference {
        let mut vocab = PhonemeVocab::new();
        let words = vec![
            Word {
                text: "قُلْ".into(),
                display_text: "قُلْ".into(),
                phonemes: vec!["q".into()],
                surah: 112,
                ayah: 1,
                word_num: 1,
            },
            Word {
                text: "هُوَ".into(),
                display_text: "هُوَ".into(),
                phonemes: vec!["h".into()],
                surah: 112,
                ayah: 1,
                word_num: 2,
            },
            Word {
                text: "اللَّهُ".into(),
                display_text: "اللَّهُ".into(),
                phonemes: vec!["l".into()],
                surah: 112,
                ayah: 2,
                word_num: 1,
            },
        ];
        ChapterReference::build(112, words, &mut vocab)
    }

    fn counts() -> VerseWordCounts {
        let mut counts = VerseWordCounts::new();
        counts.entry(112).or_default().insert(1, 2);
        counts.entry(112).or_default().insert(2, 1);
        counts
    }

    #[test]
    fn arabic_numerals_render() {
        assert_eq!(to_arabic_numeral(7), "٧");
        assert_eq!(to_arabic_numeral(255), "٢٥٥");
        assert_eq!(verse_marker(3), "\u{06DD}٣");
    }

    #[test]
    fn markers_follow_last_word_of_each_ayah() {
        let text = render_matched_text(&chapter(), 0, 2, &counts());
        assert_eq!(text, format!("قُلْ هُوَ {} اللَّهُ {}", verse_marker(1), verse_marker(2)));
    }

    #[test]
    fn mid_ayah_range_has_no_marker() {
        let text = render_matched_text(&chapter(), 0, 0, &counts());
        assert_eq!(text, "قُلْ");
    }

    #[test]
    fn end_of_verse_detection() {
        let c = counts();
        assert!(is_end_of_verse("112:1:1-112:1:2", &c));
        assert!(!is_end_of_verse("112:1:1", &c));
        assert!(is_end_of_verse("112:2:1", &c));
        assert!(!is_end_of_verse("Basmala", &c));
        assert!(!is_end_of_verse("", &c));
    }

    #[test]
    fn word_stats_cover_multi_ayah_ranges() {
        let c = counts();
        assert_eq!(ref_word_stats("112:1:1-112:1:2", &c), (2, 1));
        assert_eq!(ref_word_stats("112:1:2-112:2:1", &c), (2, 2));
        assert_eq!(ref_word_stats("112:2:1", &c), (1, 1));
        assert_eq!(ref_word_stats("garbage", &c), (0, 1));
    }

    #[test]
    fn api_json_splits_refs_and_labels_specials() {
        let report = AlignmentReport {
            segments: vec![
                SegmentOutput {
                    start_time: 0.0,
                    end_time: 3.2004,
                    transcribed_text: String::new(),
                    matched_text: "بِسْمِ".into(),
                    matched_ref: "Basmala".into(),
                    confidence: 0.97,
                    error: None,
                    has_missing_words: false,
                    potentially_undersegmented: false,
                },
                SegmentOutput {
                    start_time: 3.5,
                    end_time: 9.0,
                    transcribed_text: String::new(),
                    matched_text: "قُلْ".into(),
                    matched_ref: "112:1:1-112:1:4".into(),
                    confidence: 0.91,
                    error: None,
                    has_missing_words: true,
                    potentially_undersegmented: false,
                },
            ],
            ..Default::default()
        };

        let json = report.to_json();
        let segments = json["segments"].as_array().unwrap();
        assert_eq!(segments[0]["special_type"], "Basmala");
        assert_eq!(segments[0]["ref_from"], "");
        assert_eq!(segments[1]["segment"], 2);
        assert_eq!(segments[1]["ref_from"], "112:1:1");
        assert_eq!(segments[1]["ref_to"], "112:1:4");
        assert_eq!(segments[1]["has_missing_words"], true);
        assert_eq!(segments[0]["time_to"], 3.2);
    }

    #[rstest::rstest]
    #[case(30, 1, 20.0, true)] // long and word-heavy
    #[case(3, 2, 16.0, true)] // long and spanning two ayat
    #[case(30, 3, 5.0, false)] // big but short
    #[case(5, 1, 30.0, false)] // long but small
    fn undersegmentation_needs_both_size_and_duration(
        #[case] word_count: usize,
        #[case] ayah_span: usize,
        #[case] duration: f64,
        #[case] expected: bool,
    ) {
        let config = ReportConfig::default();
        assert_eq!(
            check_undersegmented(word_count, ayah_span, duration, &config),
            expected
        );
    }
}
