//! Sequential alignment state machine
//!
//! Walks the ASR segments in order, advancing a word pointer through the
//! current chapter. Handles retry tiers, chapter transitions, liturgical
//! interjections, fused-Basmala recovery, global re-anchoring after repeated
//! failures, and gap reporting.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::align::anchor::find_anchor_by_voting;
use crate::align::matcher::{align_segment, MatchRequest, MatchScratch};
use crate::align::report::render_matched_text;
use crate::align::special::{
    OpeningSpecials, SpecialLexicon, TransitionKind, BASMALA_TEXT,
};
use crate::align::types::{AlignmentOutcome, RunStats};
use crate::audio::types::AsrSegment;
use crate::config::AlignerConfig;
use crate::context::CancelToken;
use crate::error::Result;
use crate::reference::store::{ReferenceStore, RunVocab};
use crate::reference::types::{ChapterReference, PhonemeId};

/// Raw result for one segment, before report assembly.
#[derive(Debug, Clone, Default)]
pub struct SegResult {
    pub matched_text: String,
    pub confidence: f64,
    pub matched_ref: String,
}

impl SegResult {
    fn failure() -> Self {
        Self::default()
    }

    fn transition(kind: TransitionKind, confidence: f64) -> Self {
        Self {
            matched_text: kind.text().to_string(),
            confidence,
            matched_ref: kind.label().to_string(),
        }
    }
}

/// Matched chapter word range for one segment.
#[derive(Debug, Clone, Copy)]
pub struct MatchSpan {
    pub surah: u8,
    pub start_word: u32,
    /// Inclusive.
    pub end_word: u32,
}

/// Everything the state machine hands to report assembly.
#[derive(Debug)]
pub struct PipelineOutput {
    pub results: Vec<SegResult>,
    pub spans: Vec<Option<MatchSpan>>,
    pub gap_segments: BTreeSet<usize>,
    pub merged_into: HashMap<usize, usize>,
    pub stats: RunStats,
}

/// Runs the state machine over all segments. `segments[..first_quran_idx]`
/// are the detected opening specials; their results come from `opening`.
#[allow(clippy::too_many_arguments)]
pub fn run_alignment(
    store: &ReferenceStore,
    config: &AlignerConfig,
    segments: &[AsrSegment],
    opening: &OpeningSpecials,
    start_surah: u8,
    start_ayah: u16,
    run: &mut RunVocab<'_>,
    lexicon: &SpecialLexicon,
    cancel: &CancelToken,
) -> Result<PipelineOutput> {
    let asr_ids: Vec<Vec<PhonemeId>> = segments
        .iter()
        .map(|s| run.resolve_all(&s.phonemes))
        .collect();

    let chapter = store.chapter(start_surah)?;
    let pointer = chapter.first_word_of_ayah(start_ayah);

    let mut machine = Machine {
        store,
        config,
        lexicon,
        asr_ids,
        chapter,
        pointer,
        start_pointer: pointer,
        start_surah,
        consecutive_failures: 0,
        transition_mode: false,
        pending_specials: VecDeque::new(),
        skip_count: 0,
        tahmeed_merge_skip: 0,
        is_first_after_transition: !opening.basmala_detected,
        transition_expected_pointer: -1,
        results: Vec::with_capacity(segments.len()),
        spans: Vec::with_capacity(segments.len()),
        gap_segments: BTreeSet::new(),
        merged_into: HashMap::new(),
        stats: RunStats::default(),
        scratch: MatchScratch::new(),
    };

    for hit in &opening.hits {
        machine.results.push(SegResult {
            matched_text: hit.text.clone(),
            confidence: hit.confidence,
            matched_ref: hit.label.to_string(),
        });
        machine.spans.push(None);
    }

    for idx in opening.first_quran_idx..segments.len() {
        if cancel.is_cancelled() {
            return Err(crate::error::AlignmentError::Cancelled);
        }
        machine.process_segment(idx)?;
    }

    machine.detect_trailing_gaps()?;

    Ok(PipelineOutput {
        results: machine.results,
        spans: machine.spans,
        gap_segments: machine.gap_segments,
        merged_into: machine.merged_into,
        stats: machine.stats,
    })
}

struct Machine<'a> {
    store: &'a ReferenceStore,
    config: &'a AlignerConfig,
    lexicon: &'a SpecialLexicon,
    asr_ids: Vec<Vec<PhonemeId>>,

    chapter: Arc<ChapterReference>,
    pointer: usize,
    start_pointer: usize,
    start_surah: u8,
    consecutive_failures: usize,
    transition_mode: bool,
    pending_specials: VecDeque<SegResult>,
    skip_count: usize,
    tahmeed_merge_skip: usize,
    is_first_after_transition: bool,
    /// −1 = no pending check.
    transition_expected_pointer: i64,

    results: Vec<SegResult>,
    spans: Vec<Option<MatchSpan>>,
    gap_segments: BTreeSet<usize>,
    merged_into: HashMap<usize, usize>,
    stats: RunStats,
    scratch: MatchScratch,
}

enum ChapterEnd {
    /// The segment was fully handled (special / transition emitted).
    Handled,
    /// Chapter switched (or not); retry the segment with this result.
    Reattempted(Option<AlignmentOutcome>),
}

impl<'a> Machine<'a> {
    fn process_segment(&mut self, idx: usize) -> Result<()> {
        // (a) Segments consumed by queued specials or a Tahmeed merge.
        if self.skip_count > 0 {
            let queued = self.pending_specials.pop_front().unwrap_or_default();
            self.results.push(queued);
            self.spans.push(None);
            self.skip_count -= 1;
            return Ok(());
        }
        if self.tahmeed_merge_skip > 0 {
            self.results.push(SegResult::failure());
            self.spans.push(None);
            self.tahmeed_merge_skip -= 1;
            return Ok(());
        }

        // (b) Transition mode: keep recognising interjections until one
        // fails, then re-anchor and fall through to normal alignment.
        if self.transition_mode {
            let transition = self.lexicon.detect_transition(
                &self.asr_ids[idx],
                None,
                self.config.special.transition_threshold,
            );
            if let Some((kind, confidence)) = transition {
                self.stats.transition_skips += 1;
                self.emit_transition(idx, kind, confidence);
                return Ok(());
            }
            self.transition_mode = false;
            self.reanchor_global(idx, "transition mode exit")?;
        }

        // (c) Plain alignment attempt.
        self.stats.segments_attempted += 1;
        let mut alignment = self.attempt(idx, false, None);

        // (d) Chapter end.
        if alignment.is_none() && self.pointer >= self.chapter.num_words() {
            match self.handle_chapter_end(idx)? {
                ChapterEnd::Handled => return Ok(()),
                ChapterEnd::Reattempted(result) => alignment = result,
            }
        }

        // (e) Basmala-fused retry: always run it on the first segment after
        // a transition without a detected Basmala, and keep the better of
        // the fused and plain results.
        if self.is_first_after_transition {
            self.is_first_after_transition = false;
            let basmala: Vec<PhonemeId> = self.lexicon.basmala_ids().to_vec();
            if let Some(fused) = self.attempt(idx, false, Some(&basmala)) {
                let plain_confidence = alignment.as_ref().map_or(0.0, |a| a.confidence);
                if fused.basmala_consumed && fused.confidence > plain_confidence {
                    info!(
                        segment = idx,
                        fused = fused.confidence,
                        plain = plain_confidence,
                        "Basmala fused with first verse"
                    );
                    self.stats.special_merges += 1;
                    self.accept_fused_basmala(idx, fused);
                    return Ok(());
                }
            }
        }

        if let Some(outcome) = alignment {
            self.accept(idx, outcome);
            return Ok(());
        }

        // (f) Retry tiers, then transition detection, then failure.
        self.stats.tier1_attempts += 1;
        let mut tier2 = false;
        let mut retried = self.attempt(idx, true, None);
        if retried.is_none() {
            tier2 = true;
            self.stats.tier2_attempts += 1;
            retried = self.attempt_relaxed(idx);
        }

        if let Some(outcome) = retried {
            if tier2 {
                self.stats.tier2_passed += 1;
            } else {
                self.stats.tier1_passed += 1;
            }
            debug!(segment = idx, tier2, "recovered via retry");
            self.accept(idx, outcome);
            return Ok(());
        }

        let transition = self.lexicon.detect_transition(
            &self.asr_ids[idx],
            None,
            self.config.special.transition_threshold,
        );
        if let Some((kind, confidence)) = transition {
            self.transition_mode = true;
            self.emit_transition(idx, kind, confidence);
            return Ok(());
        }

        self.results.push(SegResult::failure());
        self.spans.push(None);
        self.consecutive_failures += 1;
        warn!(segment = idx, "alignment failed after all retries");

        if self.consecutive_failures >= self.config.pipeline.max_consecutive_failures {
            self.reanchor_global(idx + 1, "consecutive failures")?;
            self.consecutive_failures = 0;
        }
        Ok(())
    }

    /// Chapter transition flow once the pointer has run off the chapter.
    fn handle_chapter_end(&mut self, idx: usize) -> Result<ChapterEnd> {
        if self.chapter.surah == 1 {
            // After Al-Fatiha the next chapter is arbitrary: Amin, then
            // inter-chapter specials, then a global anchor (surah 2 as the
            // fallback). Gaps are expected here, so the transition-gap
            // check stays off.
            let amin = self.lexicon.detect_transition(
                &self.asr_ids[idx],
                Some(&[TransitionKind::Amin]),
                self.config.special.transition_threshold,
            );
            let specials_from = idx + usize::from(amin.is_some());
            let specials = self.lexicon.detect_inter_chapter(
                &self.asr_ids[specials_from..],
                self.config.special.special_threshold,
            );
            let anchor_from = specials_from + specials.consumed();
            let (surah, ayah) = find_anchor_by_voting(
                &self.asr_ids[anchor_from..],
                self.store.ngram_index(),
                &self.config.anchor,
            );

            if surah > 0 {
                info!(surah, ayah, "re-anchored after Al-Fatiha");
                self.chapter = self.store.chapter(surah)?;
                self.pointer = self.chapter.first_word_of_ayah(ayah);
            } else {
                info!("no anchor after Al-Fatiha, falling back to surah 2");
                self.chapter = self.store.chapter(2)?;
                self.pointer = 0;
            }
            self.stats.reanchors += 1;
            self.transition_expected_pointer = -1;
            self.consecutive_failures = 0;

            if let Some((kind, confidence)) = amin {
                self.queue_specials(&specials);
                self.is_first_after_transition = !specials.basmala_detected;
                self.stats.segments_attempted -= 1;
                self.emit_transition(idx, kind, confidence);
                return Ok(ChapterEnd::Handled);
            }
            if let Some(first) = self.emit_first_special(&specials) {
                self.stats.segments_attempted -= 1;
                self.results.push(first);
                self.spans.push(None);
                return Ok(ChapterEnd::Handled);
            }
            self.is_first_after_transition = true;
            return Ok(ChapterEnd::Reattempted(self.attempt(idx, false, None)));
        }

        if self.chapter.surah >= 114 {
            // No next chapter; let failure handling run its course.
            return Ok(ChapterEnd::Reattempted(None));
        }

        let next_surah = self.chapter.surah + 1;

        // A transition utterance at the chapter seam enters transition mode.
        let transition = self.lexicon.detect_transition(
            &self.asr_ids[idx],
            None,
            self.config.special.transition_threshold,
        );
        if let Some((kind, confidence)) = transition {
            info!(
                from = self.chapter.surah,
                to = next_surah,
                "chapter end with transition utterance"
            );
            self.chapter = self.store.chapter(next_surah)?;
            self.pointer = 0;
            self.transition_expected_pointer = 0;
            self.transition_mode = true;
            self.is_first_after_transition = true;
            self.consecutive_failures = 0;
            self.stats.segments_attempted -= 1;
            self.emit_transition(idx, kind, confidence);
            return Ok(ChapterEnd::Handled);
        }

        info!(
            from = self.chapter.surah,
            to = next_surah,
            "chapter complete, moving on"
        );
        self.chapter = self.store.chapter(next_surah)?;
        self.pointer = 0;
        self.transition_expected_pointer = 0;
        self.consecutive_failures = 0;

        let specials = self.lexicon.detect_inter_chapter(
            &self.asr_ids[idx..],
            self.config.special.special_threshold,
        );
        if let Some(first) = self.emit_first_special(&specials) {
            self.stats.segments_attempted -= 1;
            self.results.push(first);
            self.spans.push(None);
            return Ok(ChapterEnd::Handled);
        }

        self.is_first_after_transition = true;
        Ok(ChapterEnd::Reattempted(self.attempt(idx, false, None)))
    }

    /// Queues every special hit after the first for subsequent segments and
    /// returns the first as the current segment's result.
    fn emit_first_special(&mut self, specials: &OpeningSpecials) -> Option<SegResult> {
        if specials.consumed() == 0 {
            return None;
        }
        self.is_first_after_transition = !specials.basmala_detected;
        let mut hits = specials.hits.iter();
        let first = hits.next().map(|hit| SegResult {
            matched_text: hit.text.clone(),
            confidence: hit.confidence,
            matched_ref: hit.label.to_string(),
        });
        self.queue_rest(hits);
        first
    }

    /// Queues all special hits (used when the current segment is an Amin and
    /// the specials follow it).
    fn queue_specials(&mut self, specials: &OpeningSpecials) {
        self.queue_rest(specials.hits.iter());
    }

    fn queue_rest<'h>(&mut self, hits: impl Iterator<Item = &'h crate::align::special::SpecialHit>) {
        for hit in hits {
            self.pending_specials.push_back(SegResult {
                matched_text: hit.text.clone(),
                confidence: hit.confidence,
                matched_ref: hit.label.to_string(),
            });
            self.skip_count += 1;
        }
    }

    fn attempt(
        &mut self,
        idx: usize,
        expanded: bool,
        prefix: Option<&[PhonemeId]>,
    ) -> Option<AlignmentOutcome> {
        let matcher = &self.config.matcher;
        let (lookback, lookahead) = if expanded {
            (matcher.retry_lookback_words, matcher.retry_lookahead_words)
        } else {
            (matcher.lookback_words, matcher.lookahead_words)
        };
        let chapter = self.chapter.clone();
        align_segment(
            self.store,
            matcher,
            &MatchRequest {
                chapter: &chapter,
                asr: &self.asr_ids[idx],
                pointer: self.pointer,
                lookback_words: lookback,
                lookahead_words: lookahead,
                max_edit_distance: matcher.max_edit_distance,
                prefix,
            },
            &mut self.scratch,
        )
    }

    fn attempt_relaxed(&mut self, idx: usize) -> Option<AlignmentOutcome> {
        let matcher = &self.config.matcher;
        let chapter = self.chapter.clone();
        align_segment(
            self.store,
            matcher,
            &MatchRequest {
                chapter: &chapter,
                asr: &self.asr_ids[idx],
                pointer: self.pointer,
                lookback_words: matcher.retry_lookback_words,
                lookahead_words: matcher.retry_lookahead_words,
                max_edit_distance: matcher.max_edit_distance_relaxed,
                prefix: None,
            },
            &mut self.scratch,
        )
    }

    fn accept(&mut self, idx: usize, outcome: AlignmentOutcome) {
        self.is_first_after_transition = false;
        let text = render_matched_text(
            &self.chapter,
            outcome.start_word_idx as usize,
            outcome.end_word_idx as usize,
            self.store.verse_word_counts(),
        );
        self.finish_accept(idx, outcome, text);
    }

    fn accept_fused_basmala(&mut self, idx: usize, outcome: AlignmentOutcome) {
        let verse_text = render_matched_text(
            &self.chapter,
            outcome.start_word_idx as usize,
            outcome.end_word_idx as usize,
            self.store.verse_word_counts(),
        );
        let text = format!("{BASMALA_TEXT} {verse_text}");
        self.finish_accept(idx, outcome, text);
    }

    fn finish_accept(&mut self, idx: usize, outcome: AlignmentOutcome, text: String) {
        self.pointer = outcome.end_word_idx as usize + 1;
        self.consecutive_failures = 0;
        self.spans.push(Some(MatchSpan {
            surah: self.chapter.surah,
            start_word: outcome.start_word_idx,
            end_word: outcome.end_word_idx,
        }));
        self.check_transition_gap(idx, outcome.start_word_idx);
        self.results.push(SegResult {
            matched_text: text,
            confidence: outcome.confidence,
            matched_ref: outcome.matched_ref,
        });
        self.stats.segments_passed += 1;
    }

    fn emit_transition(&mut self, idx: usize, kind: TransitionKind, confidence: f64) {
        if kind == TransitionKind::Tahmeed {
            if let Some(next) = self.asr_ids.get(idx + 1) {
                if self
                    .lexicon
                    .is_tahmeed_response(next, self.config.special.transition_threshold)
                {
                    debug!(segment = idx, "Tahmeed response merged into Tahmeed");
                    self.tahmeed_merge_skip = 1;
                    self.merged_into.insert(idx + 1, idx);
                }
            }
        }
        self.results.push(SegResult::transition(kind, confidence));
        self.spans.push(None);
    }

    /// Global re-anchor over segments `from..`; switches chapter and pointer
    /// on success, arming the transition-gap check.
    fn reanchor_global(&mut self, from: usize, reason: &str) -> Result<()> {
        if from >= self.asr_ids.len() {
            return Ok(());
        }
        let (surah, ayah) = find_anchor_by_voting(
            &self.asr_ids[from..],
            self.store.ngram_index(),
            &self.config.anchor,
        );
        self.stats.reanchors += 1;
        if surah == 0 {
            warn!(reason, "global re-anchor found nothing");
            return Ok(());
        }
        if surah != self.chapter.surah {
            self.chapter = self.store.chapter(surah)?;
        }
        self.pointer = self.chapter.first_word_of_ayah(ayah);
        self.transition_expected_pointer = self.pointer as i64;
        info!(surah, ayah, word = self.pointer, reason, "global re-anchor");
        Ok(())
    }

    /// After an advance that followed a pending expected pointer: flag the
    /// segment when it starts past where the new chapter was expected to.
    fn check_transition_gap(&mut self, idx: usize, start_word: u32) {
        if self.transition_expected_pointer < 0 {
            return;
        }
        if (start_word as i64) > self.transition_expected_pointer {
            let missing = start_word as i64 - self.transition_expected_pointer;
            info!(segment = idx, missing, "words missing at start of chapter");
            self.gap_segments.insert(idx);
        }
        self.transition_expected_pointer = -1;
    }

    /// Post-processing gap detection over the finished result list.
    fn detect_trailing_gaps(&mut self) -> Result<()> {
        let mut prev: Option<(usize, MatchSpan)> = None;
        for (idx, span) in self.spans.iter().enumerate() {
            let Some(span) = span else { continue };
            if let Some((prev_idx, prev_span)) = prev {
                if prev_span.surah == span.surah
                    && span.start_word > prev_span.end_word + 1
                {
                    let missing = span.start_word - prev_span.end_word - 1;
                    info!(
                        missing,
                        prev = prev_idx,
                        curr = idx,
                        "reference gap between matched segments"
                    );
                    self.gap_segments.insert(prev_idx);
                    self.gap_segments.insert(idx);
                }
            }
            prev = Some((idx, *span));
        }

        // Missing words before the first matched segment.
        if let Some((first_idx, first_span)) =
            self.spans.iter().enumerate().find_map(|(i, s)| s.map(|s| (i, s)))
        {
            if first_span.surah == self.start_surah
                && (first_span.start_word as usize) > self.start_pointer
            {
                info!(
                    segment = first_idx,
                    "words missing before first matched segment"
                );
                self.gap_segments.insert(first_idx);
            }
        }

        // Missing words at the end of the final ayah — only when the last
        // matched segment is also the last segment overall; trailing failed
        // segments account for the remaining audio instead.
        if let Some((last_idx, last_span)) = self
            .spans
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, s)| s.map(|s| (i, s)))
        {
            if last_idx == self.spans.len() - 1 {
                let chapter = self.store.chapter(last_span.surah)?;
                let ayah_end = chapter.ayah_end_word(last_span.end_word as usize);
                if (last_span.end_word as usize) < ayah_end {
                    info!(
                        segment = last_idx,
                        missing = ayah_end - last_span.end_word as usize,
                        "recitation stops before the end of its ayah"
                    );
                    self.gap_segments.insert(last_idx);
                }
            }
        }
        Ok(())
    }
}
