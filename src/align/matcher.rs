//! Segment-to-window alignment
//!
//! Builds the reference window around the word pointer, runs the DP engine
//! and resolves the accepted match back to chapter word indices.

use tracing::trace;

use crate::align::dp::{best_window_alignment, DpCosts, DpScratch};
use crate::align::types::AlignmentOutcome;
use crate::config::MatcherConfig;
use crate::reference::store::ReferenceStore;
use crate::reference::types::{ChapterReference, PhonemeId, PREFIX_WORD};

/// One alignment attempt against the current chapter.
pub struct MatchRequest<'a> {
    pub chapter: &'a ChapterReference,
    pub asr: &'a [PhonemeId],
    /// Expected start word (the pointer).
    pub pointer: usize,
    pub lookback_words: usize,
    pub lookahead_words: usize,
    pub max_edit_distance: f64,
    /// Phonemes virtually prepended to the window, tagged with the prefix
    /// sentinel (the Basmala-fused retry).
    pub prefix: Option<&'a [PhonemeId]>,
}

/// Reusable window and DP buffers.
#[derive(Debug, Default)]
pub struct MatchScratch {
    dp: DpScratch,
    window: Vec<PhonemeId>,
    tags: Vec<i64>,
}

impl MatchScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Runs one window-constrained alignment attempt. Returns `None` when the
/// window is empty, the DP finds no candidate, or the best candidate misses
/// the acceptance threshold.
pub fn align_segment(
    store: &ReferenceStore,
    config: &MatcherConfig,
    request: &MatchRequest<'_>,
    scratch: &mut MatchScratch,
) -> Option<AlignmentOutcome> {
    let chapter = request.chapter;
    let m = request.asr.len();
    if m == 0 {
        return None;
    }

    let num_words = chapter.num_words();
    let start_word = request.pointer.saturating_sub(request.lookback_words);
    if start_word >= num_words {
        return None;
    }
    let est_words = if chapter.avg_phones_per_word > 0.0 {
        (m as f64 / chapter.avg_phones_per_word).ceil() as usize
    } else {
        m
    };
    let end_word = (request.pointer + est_words + request.lookahead_words).min(num_words);
    if end_word <= start_word {
        return None;
    }

    let phone_start = chapter.word_phone_offsets[start_word] as usize;
    let phone_end = chapter.word_phone_offsets[end_word] as usize;

    let prefix = request.prefix.unwrap_or(&[]);
    scratch.window.clear();
    scratch.tags.clear();
    scratch.window.extend_from_slice(prefix);
    scratch.tags.extend(std::iter::repeat(PREFIX_WORD).take(prefix.len()));
    scratch
        .window
        .extend_from_slice(&chapter.flat_phonemes[phone_start..phone_end]);
    scratch.tags.extend(
        chapter.flat_phone_to_word[phone_start..phone_end]
            .iter()
            .map(|&w| w as i64),
    );

    let costs = DpCosts {
        substitution: config.cost_substitution,
        deletion: config.cost_deletion,
        insertion: config.cost_insertion,
    };
    let default_sub = config.cost_substitution;
    let hit = best_window_alignment(
        request.asr,
        &scratch.window,
        &scratch.tags,
        request.pointer as i64,
        config.start_prior_weight,
        &costs,
        |a, b| store.sub_cost(a, b, default_sub),
        &mut scratch.dp,
    )?;

    if hit.norm_dist > request.max_edit_distance {
        trace!(
            norm_dist = hit.norm_dist,
            threshold = request.max_edit_distance,
            "alignment rejected"
        );
        return None;
    }

    // Resolve columns to chapter words; a match living entirely in the
    // prepended prefix aligns no verse content.
    let start_word_idx = scratch.tags[hit.start_col..hit.end_col]
        .iter()
        .find(|&&tag| tag >= 0)
        .map(|&tag| tag as u32)?;
    let end_tag = scratch.tags[hit.end_col - 1];
    if end_tag < 0 {
        return None;
    }
    let end_word_idx = end_tag as u32;

    let prefix_len = prefix.len();
    let window_phone_start =
        phone_start as u32 + hit.start_col.saturating_sub(prefix_len) as u32;
    let window_phone_end = phone_start as u32 + (hit.end_col - prefix_len) as u32;

    Some(AlignmentOutcome {
        start_word_idx,
        end_word_idx,
        edit_cost: hit.edit_cost,
        confidence: (1.0 - hit.norm_dist).clamp(0.0, 1.0),
        window_phone_start,
        window_phone_end,
        basmala_consumed: hit.start_col < prefix_len,
        matched_ref: chapter.range_ref(start_word_idx as usize, end_word_idx as usize),
    })
}
