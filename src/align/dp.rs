//! Word-boundary-constrained substring Levenshtein
//!
//! Aligns an ASR phoneme sequence against a reference phoneme window,
//! allowing the alignment to start and end only at word boundaries. Free
//! start at any boundary column; the best end column is chosen by
//! length-normalised cost plus a position prior. O(m·n) time, O(n) space.

use crate::reference::types::PhonemeId;

/// Uniform edit costs. `substitution` is the default for phoneme pairs the
/// substitution table does not cover.
#[derive(Debug, Clone, Copy)]
pub struct DpCosts {
    pub substitution: f64,
    pub deletion: f64,
    pub insertion: f64,
}

/// Best alignment found in a window. Columns are phoneme boundaries in R:
/// the match covers `r[start_col..end_col]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DpAlignment {
    pub start_col: usize,
    pub end_col: usize,
    pub edit_cost: f64,
    pub norm_dist: f64,
}

/// Reusable row buffers for the rolling DP.
#[derive(Debug, Default)]
pub struct DpScratch {
    prev_cost: Vec<f64>,
    curr_cost: Vec<f64>,
    prev_start: Vec<u32>,
    curr_start: Vec<u32>,
    boundary: Vec<bool>,
}

impl DpScratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, columns: usize) {
        self.prev_cost.clear();
        self.prev_cost.resize(columns, 0.0);
        self.curr_cost.clear();
        self.curr_cost.resize(columns, 0.0);
        self.prev_start.clear();
        self.prev_start.resize(columns, 0);
        self.curr_start.clear();
        self.curr_start.resize(columns, 0);
        self.boundary.clear();
        self.boundary.resize(columns, false);
    }
}

/// Runs the constrained substring DP.
///
/// `r_phone_to_word[j]` is the word owning `r[j]`; [`PREFIX_WORD`] marks
/// prepended special-prefix phonemes. `expected_word` feeds the position
/// prior: candidates are scored by
/// `norm_dist + prior_weight · |start_word − expected_word|`, ties broken by
/// lower `norm_dist`, then shorter reference span.
///
/// [`PREFIX_WORD`]: crate::reference::types::PREFIX_WORD
pub fn best_window_alignment<F>(
    p: &[PhonemeId],
    r: &[PhonemeId],
    r_phone_to_word: &[i64],
    expected_word: i64,
    prior_weight: f64,
    costs: &DpCosts,
    sub_cost: F,
    scratch: &mut DpScratch,
) -> Option<DpAlignment>
where
    F: Fn(PhonemeId, PhonemeId) -> f64,
{
    let m = p.len();
    let n = r.len();
    debug_assert_eq!(n, r_phone_to_word.len());
    if m == 0 || n == 0 {
        return None;
    }

    scratch.reset(n + 1);

    for j in 0..=n {
        scratch.boundary[j] = j == 0 || j == n || r_phone_to_word[j] != r_phone_to_word[j - 1];
    }

    // Row 0: free start at word boundaries, insertions elsewhere.
    for j in 0..=n {
        if scratch.boundary[j] {
            scratch.prev_cost[j] = 0.0;
            scratch.prev_start[j] = j as u32;
        } else {
            scratch.prev_cost[j] = scratch.prev_cost[j - 1] + costs.insertion;
            scratch.prev_start[j] = scratch.prev_start[j - 1];
        }
    }

    for i in 1..=m {
        scratch.curr_cost[0] = scratch.prev_cost[0] + costs.deletion;
        scratch.curr_start[0] = 0;
        for j in 1..=n {
            let diag = scratch.prev_cost[j - 1] + sub_cost(p[i - 1], r[j - 1]);
            let del = scratch.prev_cost[j] + costs.deletion;
            let ins = scratch.curr_cost[j - 1] + costs.insertion;

            let (cost, start) = if diag <= del && diag <= ins {
                (diag, scratch.prev_start[j - 1])
            } else if del <= ins {
                (del, scratch.prev_start[j])
            } else {
                (ins, scratch.curr_start[j - 1])
            };
            scratch.curr_cost[j] = cost;
            scratch.curr_start[j] = start;
        }
        std::mem::swap(&mut scratch.prev_cost, &mut scratch.curr_cost);
        std::mem::swap(&mut scratch.prev_start, &mut scratch.curr_start);
    }

    // Evaluate every valid end boundary on the final row.
    let mut best: Option<(f64, f64, usize, DpAlignment)> = None;
    for j in 0..=n {
        if !scratch.boundary[j] {
            continue;
        }
        let start = scratch.prev_start[j] as usize;
        let ref_len = j - start;
        if ref_len == 0 {
            continue;
        }
        let edit_cost = scratch.prev_cost[j];
        let norm_dist = edit_cost / (m.max(ref_len).max(1)) as f64;
        let start_word = match r_phone_to_word[start] {
            w if w < 0 => expected_word,
            w => w,
        };
        let score = norm_dist + prior_weight * (start_word - expected_word).abs() as f64;

        let candidate = (score, norm_dist, ref_len);
        let better = match &best {
            None => true,
            Some((s, nd, rl, _)) => candidate < (*s, *nd, *rl),
        };
        if better {
            best = Some((
                score,
                norm_dist,
                ref_len,
                DpAlignment {
                    start_col: start,
                    end_col: j,
                    edit_cost,
                    norm_dist,
                },
            ));
        }
    }

    best.map(|(_, _, _, alignment)| alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const UNIT: DpCosts = DpCosts {
        substitution: 1.0,
        deletion: 1.0,
        insertion: 1.0,
    };

    fn unit_sub(a: PhonemeId, b: PhonemeId) -> f64 {
        if a == b {
            0.0
        } else {
            1.0
        }
    }

    /// Three words of three phonemes each: [0 1 2][3 4 5][6 7 8].
    fn window() -> (Vec<PhonemeId>, Vec<i64>) {
        let r: Vec<PhonemeId> = (0..9).collect();
        let tags = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        (r, tags)
    }

    fn align(p: &[PhonemeId], expected_word: i64) -> Option<DpAlignment> {
        let (r, tags) = window();
        let mut scratch = DpScratch::new();
        best_window_alignment(p, &r, &tags, expected_word, 0.0, &UNIT, unit_sub, &mut scratch)
    }

    #[test]
    fn exact_word_match_has_zero_cost() {
        let hit = align(&[3, 4, 5], 1).unwrap();
        assert_eq!(hit.start_col, 3);
        assert_eq!(hit.end_col, 6);
        assert_eq!(hit.edit_cost, 0.0);
        assert_eq!(hit.norm_dist, 0.0);
    }

    #[test]
    fn match_cannot_start_mid_word() {
        // P matches phonemes 4..7, which straddles a word boundary; the
        // engine must anchor to a boundary and absorb the difference.
        let hit = align(&[4, 5, 6], 0).unwrap();
        assert!(hit.start_col == 3 || hit.start_col == 6);
        assert!(hit.edit_cost > 0.0);
    }

    #[test]
    fn spans_multiple_words() {
        let hit = align(&[3, 4, 5, 6, 7, 8], 1).unwrap();
        assert_eq!((hit.start_col, hit.end_col), (3, 9));
        assert_eq!(hit.edit_cost, 0.0);
    }

    #[test]
    fn single_substitution_costs_one() {
        let hit = align(&[3, 99, 5], 1).unwrap();
        assert_eq!((hit.start_col, hit.end_col), (3, 6));
        assert_eq!(hit.edit_cost, 1.0);
        assert!((hit.norm_dist - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn prior_steers_between_equal_matches() {
        // Two identical words: [0 1][0 1].
        let r = vec![10, 11, 10, 11];
        let tags = vec![0, 0, 1, 1];
        let mut scratch = DpScratch::new();
        let near = best_window_alignment(
            &[10, 11],
            &r,
            &tags,
            1,
            0.1,
            &UNIT,
            unit_sub,
            &mut scratch,
        )
        .unwrap();
        assert_eq!(near.start_col, 2);

        let far = best_window_alignment(
            &[10, 11],
            &r,
            &tags,
            0,
            0.1,
            &UNIT,
            unit_sub,
            &mut scratch,
        )
        .unwrap();
        assert_eq!(far.start_col, 0);
    }

    #[test]
    fn prefix_sentinel_counts_as_expected_word() {
        // Prefix phonemes tagged -1 followed by one real word.
        let r = vec![20, 21, 0, 1, 2];
        let tags = vec![-1, -1, 0, 0, 0];
        let mut scratch = DpScratch::new();
        let hit = best_window_alignment(
            &[20, 21, 0, 1, 2],
            &r,
            &tags,
            0,
            0.5,
            &UNIT,
            unit_sub,
            &mut scratch,
        )
        .unwrap();
        assert_eq!(hit.start_col, 0);
        assert_eq!(hit.edit_cost, 0.0);
    }

    #[test]
    fn empty_inputs_yield_no_candidate() {
        assert!(align(&[], 0).is_none());
        let mut scratch = DpScratch::new();
        assert!(best_window_alignment(
            &[1, 2],
            &[],
            &[],
            0,
            0.0,
            &UNIT,
            unit_sub,
            &mut scratch
        )
        .is_none());
    }

    #[test]
    fn custom_substitution_costs_flow_through() {
        let close_sub = |a: PhonemeId, b: PhonemeId| -> f64 {
            if a == b {
                0.0
            } else if (a, b) == (99, 4) || (a, b) == (4, 99) {
                0.2
            } else {
                1.0
            }
        };
        let (r, tags) = window();
        let mut scratch = DpScratch::new();
        let hit = best_window_alignment(
            &[3, 99, 5],
            &r,
            &tags,
            1,
            0.0,
            &UNIT,
            close_sub,
            &mut scratch,
        )
        .unwrap();
        assert!((hit.edit_cost - 0.2).abs() < 1e-12);
    }

    /// Plain Levenshtein with unit costs, for cross-checking.
    fn levenshtein(a: &[PhonemeId], b: &[PhonemeId]) -> usize {
        let mut prev: Vec<usize> = (0..=b.len()).collect();
        let mut curr = vec![0; b.len() + 1];
        for i in 1..=a.len() {
            curr[0] = i;
            for j in 1..=b.len() {
                let cost = usize::from(a[i - 1] != b[j - 1]);
                curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[b.len()]
    }

    proptest! {
        /// With unit costs, the reported cost is the exact Levenshtein
        /// distance of the chosen word-bounded substring, no other start
        /// boundary reaches the chosen end more cheaply, and both ends of
        /// the match sit on word boundaries.
        #[test]
        fn cost_is_exact_and_end_optimal(
            p in prop::collection::vec(0u32..6, 1..10),
            word_lens in prop::collection::vec(1usize..4, 1..5),
            seed in prop::collection::vec(0u32..6, 1..16),
        ) {
            let mut r = Vec::new();
            let mut tags = Vec::new();
            let mut cursor = 0;
            for (word, &len) in word_lens.iter().enumerate() {
                for _ in 0..len {
                    r.push(seed[cursor % seed.len()]);
                    tags.push(word as i64);
                    cursor += 1;
                }
            }

            let mut boundaries = vec![0usize];
            for j in 1..=r.len() {
                if j == r.len() || tags[j] != tags[j - 1] {
                    boundaries.push(j);
                }
            }

            let mut scratch = DpScratch::new();
            let hit = best_window_alignment(
                &p, &r, &tags, 0, 0.0, &UNIT, unit_sub, &mut scratch,
            ).unwrap();

            // Start/end boundary law.
            prop_assert!(boundaries.contains(&hit.start_col));
            prop_assert!(boundaries.contains(&hit.end_col));

            // The cost is the chosen substring's exact edit distance.
            let exact = levenshtein(&p, &r[hit.start_col..hit.end_col]) as f64;
            prop_assert!((hit.edit_cost - exact).abs() < 1e-9);

            // No start boundary reaches the same end more cheaply.
            for &a in boundaries.iter().filter(|&&a| a < hit.end_col) {
                let other = levenshtein(&p, &r[a..hit.end_col]) as f64;
                prop_assert!(hit.edit_cost <= other + 1e-9);
            }
        }
    }
}
