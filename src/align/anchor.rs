//! Global anchor detection by phoneme n-gram voting
//!
//! Each ASR n-gram found in the Qur'an-wide index votes for every
//! `(surah, ayah)` it occurs at, weighted by rarity. The winning surah is
//! chosen by its best contiguous ayah run rather than raw totals, which
//! keeps scattered noise votes in long surahs from outvoting a dense run.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::config::AnchorConfig;
use crate::reference::ngram::NgramIndex;
use crate::reference::types::PhonemeId;

/// Votes on `(surah, ayah)` over the first `anchor_segments` non-empty
/// segments. Returns `(0, 0)` when nothing matched.
pub fn find_anchor_by_voting(
    phoneme_segments: &[Vec<PhonemeId>],
    index: &NgramIndex,
    config: &AnchorConfig,
) -> (u8, u16) {
    let combined = combine_segments(phoneme_segments, config.anchor_segments);
    let votes = cast_votes(&combined, index, config.rarity_weighting, None);
    if votes.is_empty() {
        debug!("anchor voting cast no votes");
        return (0, 0);
    }

    // Phase 1b: shortlist surahs by raw total weight.
    let mut surah_totals: HashMap<u8, f64> = HashMap::new();
    for (&(surah, _), &weight) in &votes {
        *surah_totals.entry(surah).or_default() += weight;
    }
    let mut ranked: Vec<(u8, f64)> = surah_totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(config.top_candidates);

    // Phase 2: rank candidates by their best contiguous ayah run.
    let mut best: Option<(u8, u16, f64)> = None;
    for (surah, _) in ranked {
        let ayah_weights: HashMap<u16, f64> = votes
            .iter()
            .filter(|((s, _), _)| *s == surah)
            .map(|((_, ayah), &weight)| (*ayah, weight))
            .collect();
        let (run_start, _run_end, run_weight) =
            best_contiguous_run(&ayah_weights, config.run_trim_ratio);
        if best.map_or(true, |(_, _, w)| run_weight > w) {
            best = Some((surah, run_start, run_weight));
        }
    }

    match best {
        Some((surah, ayah, weight)) => {
            info!(surah, ayah, weight, "anchor found");
            (surah, ayah)
        }
        None => (0, 0),
    }
}

/// Re-anchor restricted to a known surah. Returns the run-start ayah, or 0
/// when no vote landed in the surah.
pub fn reanchor_within_surah(
    phoneme_segments: &[Vec<PhonemeId>],
    index: &NgramIndex,
    surah: u8,
    config: &AnchorConfig,
) -> u16 {
    let combined = combine_segments(phoneme_segments, config.anchor_segments);
    let votes = cast_votes(&combined, index, config.rarity_weighting, Some(surah));
    if votes.is_empty() {
        return 0;
    }
    let ayah_weights: HashMap<u16, f64> = votes
        .into_iter()
        .map(|((_, ayah), weight)| (ayah, weight))
        .collect();
    let (run_start, _, _) = best_contiguous_run(&ayah_weights, config.run_trim_ratio);
    run_start
}

fn combine_segments(segments: &[Vec<PhonemeId>], limit: usize) -> Vec<PhonemeId> {
    let mut combined = Vec::new();
    for phonemes in segments.iter().filter(|p| !p.is_empty()).take(limit) {
        combined.extend_from_slice(phonemes);
    }
    combined
}

fn cast_votes(
    combined: &[PhonemeId],
    index: &NgramIndex,
    rarity_weighting: bool,
    only_surah: Option<u8>,
) -> HashMap<(u8, u16), f64> {
    let n = index.n;
    let mut votes: HashMap<(u8, u16), f64> = HashMap::new();
    if combined.len() < n {
        return votes;
    }
    for window in combined.windows(n) {
        let Some(occurrences) = index.positions.get(window) else {
            continue;
        };
        let weight = if rarity_weighting {
            1.0 / index.counts[window] as f64
        } else {
            1.0
        };
        for &(surah, ayah) in occurrences {
            if only_surah.is_some_and(|s| s != surah) {
                continue;
            }
            *votes.entry((surah, ayah)).or_default() += weight;
        }
    }
    votes
}

/// Highest-weight run of consecutive ayahs, with low-weight edges trimmed
/// below `trim_ratio × max_weight_in_run`.
fn best_contiguous_run(
    ayah_weights: &HashMap<u16, f64>,
    trim_ratio: f64,
) -> (u16, u16, f64) {
    if ayah_weights.is_empty() {
        return (0, 0, 0.0);
    }

    let mut ayahs: Vec<u16> = ayah_weights.keys().copied().collect();
    ayahs.sort_unstable();

    let mut runs: Vec<(u16, u16, f64)> = Vec::new();
    let mut run_start = ayahs[0];
    let mut run_end = ayahs[0];
    let mut run_weight = ayah_weights[&ayahs[0]];
    for &ayah in &ayahs[1..] {
        if ayah == run_end + 1 {
            run_end = ayah;
            run_weight += ayah_weights[&ayah];
        } else {
            runs.push((run_start, run_end, run_weight));
            run_start = ayah;
            run_end = ayah;
            run_weight = ayah_weights[&ayah];
        }
    }
    runs.push((run_start, run_end, run_weight));

    let Some((mut best_start, mut best_end, mut best_weight)) =
        runs.into_iter().max_by(|a, b| a.2.total_cmp(&b.2))
    else {
        return (0, 0, 0.0);
    };

    let max_in_run = (best_start..=best_end)
        .filter_map(|a| ayah_weights.get(&a))
        .fold(0.0f64, |acc, &w| acc.max(w));
    let threshold = trim_ratio * max_in_run;

    while best_start < best_end && ayah_weights[&best_start] < threshold {
        best_weight -= ayah_weights[&best_start];
        best_start += 1;
    }
    while best_end > best_start && ayah_weights[&best_end] < threshold {
        best_weight -= ayah_weights[&best_end];
        best_end -= 1;
    }

    (best_start, best_end, best_weight)
}
