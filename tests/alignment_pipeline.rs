//! End-to-end alignment scenarios over the synthetic mini-Qur'an corpus.

mod common;

use common::{ayah_phonemes, fixture, params, strs};
use quran_aligner::align::special::{BASMALA_PHONEMES, ISTIADHA_PHONEMES};

fn concat(parts: &[Vec<String>]) -> Vec<String> {
    parts.iter().flatten().cloned().collect()
}

#[tokio::test]
async fn full_surah_recitation_aligns_every_ayah() {
    let fx = fixture(vec![
        ayah_phonemes(112, 1),
        ayah_phonemes(112, 2),
        ayah_phonemes(112, 3),
        ayah_phonemes(112, 4),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments.len(), 4);
    assert_eq!(report.source_surah_hint, Some(112));
    assert_eq!(report.segments[0].matched_ref, "112:1:1-112:1:4");
    assert_eq!(report.segments[3].matched_ref, "112:4:1-112:4:5");
    for segment in &report.segments {
        assert!(segment.confidence >= 0.8, "low confidence: {segment:?}");
        assert!(!segment.has_missing_words);
        assert!(segment.error.is_none());
    }
    // Every match was exact, so no retries or re-anchors fired.
    assert_eq!(report.stats.segments_passed, 4);
    assert_eq!(report.stats.reanchors, 0);
}

#[tokio::test]
async fn fused_opening_invocations_split_segment_zero() {
    let combined = concat(&[strs(ISTIADHA_PHONEMES), strs(BASMALA_PHONEMES)]);
    let fx = fixture(vec![
        combined,
        ayah_phonemes(112, 1),
        ayah_phonemes(112, 2),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    // Segment 0 split 50/50 into the two invocations; verses follow.
    assert_eq!(report.segments.len(), 4);
    assert_eq!(report.segments[0].matched_ref, "Isti'adha");
    assert_eq!(report.segments[1].matched_ref, "Basmala");
    assert!(
        (report.segments[0].end_time - report.segments[1].start_time).abs() < 1e-9
    );
    let half = (report.segments[0].end_time - report.segments[0].start_time)
        - (report.segments[1].end_time - report.segments[1].start_time);
    assert!(half.abs() < 1e-6);
    assert_eq!(report.segments[2].matched_ref, "112:1:1-112:1:4");
    assert_eq!(report.segments[3].matched_ref, "112:2:1-112:2:2");
}

#[tokio::test]
async fn standalone_basmala_shifts_quran_start() {
    let fx = fixture(vec![
        strs(BASMALA_PHONEMES),
        ayah_phonemes(113, 1),
        ayah_phonemes(113, 2),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments.len(), 3);
    assert_eq!(report.segments[0].matched_ref, "Basmala");
    assert_eq!(report.segments[1].matched_ref, "113:1:1-113:1:3");
    assert_eq!(report.segments[2].matched_ref, "113:2:1-113:2:3");
}

#[tokio::test]
async fn chapter_boundary_rolls_into_next_surah() {
    let fx = fixture(vec![
        ayah_phonemes(113, 1),
        ayah_phonemes(113, 2),
        ayah_phonemes(114, 1),
        ayah_phonemes(114, 2),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.source_surah_hint, Some(113));
    assert_eq!(report.segments[0].matched_ref, "113:1:1-113:1:3");
    assert_eq!(report.segments[1].matched_ref, "113:2:1-113:2:3");
    assert_eq!(report.segments[2].matched_ref, "114:1:1-114:1:3");
    assert_eq!(report.segments[3].matched_ref, "114:2:1-114:2:2");
    assert!(report.segments.iter().all(|s| !s.has_missing_words));
}

#[tokio::test]
async fn skipped_words_flag_both_neighbours() {
    // Ayah 2 of surah 112 is skipped entirely.
    let fx = fixture(vec![ayah_phonemes(112, 1), ayah_phonemes(112, 3)]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments[0].matched_ref, "112:1:1-112:1:4");
    assert_eq!(report.segments[1].matched_ref, "112:3:1-112:3:3");
    assert!(report.segments[0].has_missing_words);
    assert!(report.segments[1].has_missing_words);
}

#[tokio::test]
async fn repeated_failures_trigger_global_reanchor() {
    let garbage_a = strs(&["zz1", "zz2", "zz3", "zz4", "zz5", "zz6"]);
    let garbage_b = strs(&["yy1", "yy2", "yy3", "yy4", "yy5", "yy6"]);
    let fx = fixture(vec![
        ayah_phonemes(112, 1),
        ayah_phonemes(112, 2),
        garbage_a,
        garbage_b,
        ayah_phonemes(2, 1),
        ayah_phonemes(2, 2),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    // Anchored in 112, jumped to surah 2 after two consecutive failures.
    assert_eq!(report.source_surah_hint, Some(112));
    assert_eq!(report.segments[0].matched_ref, "112:1:1-112:1:4");
    assert_eq!(report.segments[4].matched_ref, "2:1:1-2:1:3");
    assert_eq!(report.segments[5].matched_ref, "2:2:1-2:2:3");
    assert!(report.stats.reanchors >= 1);

    for failed in &report.segments[2..4] {
        assert_eq!(failed.confidence, 0.0);
        assert_eq!(failed.matched_ref, "");
        assert_eq!(failed.error.as_deref(), Some("Low confidence (0%)"));
    }
}

#[tokio::test]
async fn tahmeed_response_merges_into_previous_segment() {
    let tahmeed = strs(&[
        "s", "a", "m", "i", "ʕ", "a", "l", "l", "aː", "h", "u", "l", "i", "m", "a", "n",
        "ħ", "a", "m", "i", "d", "a", "h",
    ]);
    let response = strs(&[
        "r", "a", "b", "b", "a", "n", "aː", "w", "a", "l", "a", "k", "a", "l", "ħ", "a",
        "m", "d",
    ]);
    let fx = fixture(vec![
        ayah_phonemes(112, 1),
        tahmeed,
        response,
        ayah_phonemes(112, 2),
    ]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments[1].matched_ref, "Tahmeed");
    // The response segment's audio extends the Tahmeed.
    assert!((report.segments[1].end_time - report.segments[2].end_time).abs() < 1e-9);
    assert_eq!(report.segments[2].matched_ref, "");
    assert!(report.segments[2].error.is_none());
    assert_eq!(report.merged_into.get(&2), Some(&1));
    // Alignment resumes on the following verse.
    assert_eq!(report.segments[3].matched_ref, "112:2:1-112:2:2");
}

#[tokio::test]
async fn basmala_fused_with_first_verse_is_recovered() {
    // No pause between the Basmala and the first verse: one segment holds
    // both, and neither the opening detector nor the plain DP accepts it.
    let mut fused = strs(BASMALA_PHONEMES);
    fused.extend(ayah_phonemes(112, 1));
    let fx = fixture(vec![fused, ayah_phonemes(112, 2)]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments[0].matched_ref, "112:1:1-112:1:4");
    assert!(report.segments[0]
        .matched_text
        .starts_with(quran_aligner::align::special::BASMALA_TEXT));
    assert!(report.segments[0].confidence > 0.9);
    assert_eq!(report.stats.special_merges, 1);
    assert_eq!(report.segments[1].matched_ref, "112:2:1-112:2:2");
}

#[tokio::test]
async fn final_segment_stopping_mid_ayah_is_penalised_and_flagged() {
    // Only the first three of five words of ayah 4.
    let partial: Vec<String> = [10, 11, 12]
        .iter()
        .flat_map(|&uid| common::word_phonemes(uid))
        .collect();
    let fx = fixture(vec![ayah_phonemes(112, 3), partial]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    let last = report.segments.last().unwrap();
    assert_eq!(last.matched_ref, "112:4:1-112:4:3");
    assert!(last.has_missing_words);
    // Exact phoneme match, minus the fixed end-of-recitation penalty.
    assert!((last.confidence - 0.75).abs() < 1e-6);
}

#[tokio::test]
async fn verse_text_carries_end_of_ayah_markers() {
    let fx = fixture(vec![concat(&[
        ayah_phonemes(112, 1),
        ayah_phonemes(112, 2),
    ])]);
    let report = fx.context.align(&fx.audio, &params()).await.unwrap();

    assert_eq!(report.segments[0].matched_ref, "112:1:1-112:2:2");
    let text = &report.segments[0].matched_text;
    assert!(text.contains('\u{06DD}'), "no ayah marker in {text:?}");
    assert!(text.contains("\u{06DD}١"));
    assert!(text.contains("\u{06DD}٢"));
}
