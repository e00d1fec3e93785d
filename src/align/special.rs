//! Special-segment detection
//!
//! Recitations open with up to two invocations (Isti'adha, Basmala) and may
//! contain liturgical interjections between ayat (Amin, Takbir, Tahmeed,
//! Tasleem, Sadaqa). All are matched by normalised phoneme edit distance
//! against hard-coded canonical sequences.

use tracing::{debug, info};

use crate::audio::types::AsrSegment;
use crate::reference::store::RunVocab;
use crate::reference::types::PhonemeId;

pub const ISTIADHA_TEXT: &str = "أَعُوذُ بِاللَّهِ مِنَ الشَّيْطَانِ الرَّجِيمِ";
pub const BASMALA_TEXT: &str = "بِسْمِ اللَّهِ الرَّحْمَٰنِ الرَّحِيمِ";

pub const ISTIADHA_PHONEMES: &[&str] = &[
    "ʔ", "a", "ʕ", "uː", "ð", "u", "b", "i", "l", "l", "aː", "h", "i", "m", "i", "n", "a",
    "ʃ", "ʃ", "a", "j", "tˤ", "aː", "n", "i", "r", "r", "a", "dʒ", "iː", "m",
];
pub const BASMALA_PHONEMES: &[&str] = &[
    "b", "i", "s", "m", "i", "l", "l", "aː", "h", "i", "r", "r", "a", "ħ", "m", "aː", "n",
    "i", "r", "r", "a", "ħ", "iː", "m",
];

/// Opening invocation labels as they appear in `matched_ref`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Istiadha,
    Basmala,
    /// Both invocations fused into one audio segment.
    Combined,
}

impl SpecialKind {
    pub fn label(&self) -> &'static str {
        match self {
            SpecialKind::Istiadha => "Isti'adha",
            SpecialKind::Basmala => "Basmala",
            SpecialKind::Combined => "Isti'adha+Basmala",
        }
    }

    pub fn text(&self) -> String {
        match self {
            SpecialKind::Istiadha => ISTIADHA_TEXT.to_string(),
            SpecialKind::Basmala => BASMALA_TEXT.to_string(),
            SpecialKind::Combined => format!("{ISTIADHA_TEXT} ۝ {BASMALA_TEXT}"),
        }
    }
}

/// Liturgical transition utterances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Amin,
    Takbir,
    Tahmeed,
    TahmeedResponse,
    Tasleem,
    Sadaqa,
}

impl TransitionKind {
    pub const ALL: &'static [TransitionKind] = &[
        TransitionKind::Amin,
        TransitionKind::Takbir,
        TransitionKind::Tahmeed,
        TransitionKind::Tasleem,
        TransitionKind::Sadaqa,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TransitionKind::Amin => "Amin",
            TransitionKind::Takbir => "Takbir",
            TransitionKind::Tahmeed => "Tahmeed",
            TransitionKind::TahmeedResponse => "Tahmeed",
            TransitionKind::Tasleem => "Tasleem",
            TransitionKind::Sadaqa => "Sadaqa",
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            TransitionKind::Amin => "آمِين",
            TransitionKind::Takbir => "اللَّهُ أَكْبَرُ",
            TransitionKind::Tahmeed => "سَمِعَ اللَّهُ لِمَنْ حَمِدَهُ",
            TransitionKind::TahmeedResponse => "رَبَّنَا وَلَكَ الْحَمْدُ",
            TransitionKind::Tasleem => "السَّلَامُ عَلَيْكُمْ وَرَحْمَةُ اللَّهِ",
            TransitionKind::Sadaqa => "صَدَقَ اللَّهُ الْعَظِيمُ",
        }
    }

    fn phonemes(&self) -> &'static [&'static str] {
        match self {
            TransitionKind::Amin => &["ʔ", "aː", "m", "iː", "n"],
            TransitionKind::Takbir => {
                &["a", "l", "l", "aː", "h", "u", "ʔ", "a", "k", "b", "a", "r"]
            }
            TransitionKind::Tahmeed => &[
                "s", "a", "m", "i", "ʕ", "a", "l", "l", "aː", "h", "u", "l", "i", "m", "a",
                "n", "ħ", "a", "m", "i", "d", "a", "h",
            ],
            TransitionKind::TahmeedResponse => &[
                "r", "a", "b", "b", "a", "n", "aː", "w", "a", "l", "a", "k", "a", "l", "ħ",
                "a", "m", "d",
            ],
            TransitionKind::Tasleem => &[
                "a", "s", "s", "a", "l", "aː", "m", "u", "ʕ", "a", "l", "a", "j", "k", "u",
                "m", "w", "a", "r", "a", "ħ", "m", "a", "t", "u", "l", "l", "aː", "h",
            ],
            TransitionKind::Sadaqa => &[
                "sˤ", "a", "d", "a", "q", "a", "l", "l", "aː", "h", "u", "l", "ʕ", "a",
                "ðˤ", "iː", "m",
            ],
        }
    }
}

/// Labels that mark a non-verse segment in `matched_ref`.
pub const ALL_SPECIAL_REFS: &[&str] = &[
    "Isti'adha",
    "Basmala",
    "Isti'adha+Basmala",
    "Amin",
    "Takbir",
    "Tahmeed",
    "Tasleem",
    "Sadaqa",
];

pub fn is_special_ref(matched_ref: &str) -> bool {
    ALL_SPECIAL_REFS.contains(&matched_ref)
}

/// A recognised special or transition utterance.
#[derive(Debug, Clone)]
pub struct SpecialHit {
    pub label: &'static str,
    pub text: String,
    pub confidence: f64,
}

/// Canonical sequences resolved to interned phoneme ids for one run.
pub struct SpecialLexicon {
    istiadha: Vec<PhonemeId>,
    basmala: Vec<PhonemeId>,
    combined: Vec<PhonemeId>,
    transitions: Vec<(TransitionKind, Vec<PhonemeId>)>,
}

impl SpecialLexicon {
    pub fn new(run: &mut RunVocab<'_>) -> Self {
        let resolve = |run: &mut RunVocab<'_>, phonemes: &[&str]| -> Vec<PhonemeId> {
            phonemes.iter().map(|p| run.resolve(p)).collect()
        };
        let istiadha = resolve(run, ISTIADHA_PHONEMES);
        let basmala = resolve(run, BASMALA_PHONEMES);
        let mut combined = istiadha.clone();
        combined.extend_from_slice(&basmala);

        let mut transitions = Vec::new();
        for &kind in TransitionKind::ALL {
            transitions.push((kind, resolve(run, kind.phonemes())));
        }
        transitions.push((
            TransitionKind::TahmeedResponse,
            resolve(run, TransitionKind::TahmeedResponse.phonemes()),
        ));

        Self {
            istiadha,
            basmala,
            combined,
            transitions,
        }
    }

    pub fn basmala_ids(&self) -> &[PhonemeId] {
        &self.basmala
    }

    fn distance_to(&self, kind: SpecialKind, asr: &[PhonemeId]) -> f64 {
        let reference = match kind {
            SpecialKind::Istiadha => &self.istiadha,
            SpecialKind::Basmala => &self.basmala,
            SpecialKind::Combined => &self.combined,
        };
        normalized_distance(asr, reference)
    }

    /// Detects the opening invocations on segments 0 (and 1). A fused
    /// "combined" segment 0 is split into two equal-duration halves,
    /// shifting all subsequent indices by one.
    ///
    /// Returns the per-segment hits (one per consumed segment) and the index
    /// of the first Qur'an-content segment in the (possibly re-indexed) list.
    pub fn detect_opening(
        &self,
        segments: &mut Vec<AsrSegment>,
        run: &mut RunVocab<'_>,
        threshold: f64,
    ) -> OpeningSpecials {
        let Some(first) = segments.first() else {
            return OpeningSpecials::none();
        };
        let seg0 = run.resolve_all(&first.phonemes);

        let combined_dist = self.distance_to(SpecialKind::Combined, &seg0);
        if combined_dist <= threshold {
            let confidence = 1.0 - combined_dist;
            split_segment_in_half(segments, 0);
            info!(confidence, "fused Isti'adha+Basmala detected, segment 0 split");
            return OpeningSpecials {
                hits: vec![
                    special_hit(SpecialKind::Istiadha, confidence),
                    special_hit(SpecialKind::Basmala, confidence),
                ],
                first_quran_idx: 2,
                basmala_detected: true,
            };
        }

        let istiadha_dist = self.distance_to(SpecialKind::Istiadha, &seg0);
        if istiadha_dist <= threshold {
            let mut hits = vec![special_hit(SpecialKind::Istiadha, 1.0 - istiadha_dist)];
            if let Some(second) = segments.get(1) {
                let seg1 = run.resolve_all(&second.phonemes);
                let basmala_dist = self.distance_to(SpecialKind::Basmala, &seg1);
                if basmala_dist <= threshold {
                    hits.push(special_hit(SpecialKind::Basmala, 1.0 - basmala_dist));
                    return OpeningSpecials {
                        hits,
                        first_quran_idx: 2,
                        basmala_detected: true,
                    };
                }
            }
            return OpeningSpecials {
                hits,
                first_quran_idx: 1,
                basmala_detected: false,
            };
        }

        let basmala_dist = self.distance_to(SpecialKind::Basmala, &seg0);
        if basmala_dist <= threshold {
            return OpeningSpecials {
                hits: vec![special_hit(SpecialKind::Basmala, 1.0 - basmala_dist)],
                first_quran_idx: 1,
                basmala_detected: true,
            };
        }

        OpeningSpecials::none()
    }

    /// Inter-chapter variant of the opening detection: same matching order,
    /// no audio splitting. A fused pair stays one segment labelled
    /// "Isti'adha+Basmala".
    pub fn detect_inter_chapter(
        &self,
        phonemes: &[Vec<PhonemeId>],
        threshold: f64,
    ) -> OpeningSpecials {
        let Some(seg0) = phonemes.first() else {
            return OpeningSpecials::none();
        };

        let combined_dist = self.distance_to(SpecialKind::Combined, seg0);
        if combined_dist <= threshold {
            return OpeningSpecials {
                hits: vec![special_hit(SpecialKind::Combined, 1.0 - combined_dist)],
                first_quran_idx: 1,
                basmala_detected: true,
            };
        }

        let istiadha_dist = self.distance_to(SpecialKind::Istiadha, seg0);
        if istiadha_dist <= threshold {
            let mut hits = vec![special_hit(SpecialKind::Istiadha, 1.0 - istiadha_dist)];
            if let Some(seg1) = phonemes.get(1) {
                let basmala_dist = self.distance_to(SpecialKind::Basmala, seg1);
                if basmala_dist <= threshold {
                    hits.push(special_hit(SpecialKind::Basmala, 1.0 - basmala_dist));
                    return OpeningSpecials {
                        hits,
                        first_quran_idx: 2,
                        basmala_detected: true,
                    };
                }
            }
            return OpeningSpecials {
                hits,
                first_quran_idx: 1,
                basmala_detected: false,
            };
        }

        let basmala_dist = self.distance_to(SpecialKind::Basmala, seg0);
        if basmala_dist <= threshold {
            return OpeningSpecials {
                hits: vec![special_hit(SpecialKind::Basmala, 1.0 - basmala_dist)],
                first_quran_idx: 1,
                basmala_detected: true,
            };
        }

        OpeningSpecials::none()
    }

    /// Best-matching transition utterance under the (looser) transition
    /// threshold, optionally restricted to an allowed set.
    pub fn detect_transition(
        &self,
        asr: &[PhonemeId],
        allowed: Option<&[TransitionKind]>,
        threshold: f64,
    ) -> Option<(TransitionKind, f64)> {
        if asr.is_empty() {
            return None;
        }
        let mut best: Option<(TransitionKind, f64)> = None;
        for (kind, reference) in &self.transitions {
            if let Some(allowed) = allowed {
                if !allowed.contains(kind) {
                    continue;
                }
            }
            let dist = normalized_distance(asr, reference);
            if dist <= threshold && best.map_or(true, |(_, d)| dist < d) {
                best = Some((*kind, dist));
            }
        }
        if let Some((kind, dist)) = best {
            debug!(kind = kind.label(), dist, "transition utterance detected");
        }
        best.map(|(kind, dist)| (kind, 1.0 - dist))
    }

    /// True when the next segment answers a Tahmeed with the response
    /// formula ("rabbanā wa-laka-l-ḥamd").
    pub fn is_tahmeed_response(&self, asr: &[PhonemeId], threshold: f64) -> bool {
        self.transitions
            .iter()
            .filter(|(kind, _)| *kind == TransitionKind::TahmeedResponse)
            .any(|(_, reference)| normalized_distance(asr, reference) <= threshold)
    }
}

/// Outcome of opening / inter-chapter special detection.
#[derive(Debug, Clone)]
pub struct OpeningSpecials {
    /// One hit per consumed segment, in order.
    pub hits: Vec<SpecialHit>,
    pub first_quran_idx: usize,
    pub basmala_detected: bool,
}

impl OpeningSpecials {
    fn none() -> Self {
        Self {
            hits: Vec::new(),
            first_quran_idx: 0,
            basmala_detected: false,
        }
    }

    pub fn consumed(&self) -> usize {
        self.hits.len()
    }
}

fn special_hit(kind: SpecialKind, confidence: f64) -> SpecialHit {
    SpecialHit {
        label: kind.label(),
        text: kind.text(),
        confidence,
    }
}

/// Splits `segments[idx]` into two equal-duration halves; the phoneme list
/// splits at its midpoint for bookkeeping.
fn split_segment_in_half(segments: &mut Vec<AsrSegment>, idx: usize) {
    let original = segments[idx].clone();
    let mid_time = (original.start_time + original.end_time) / 2.0;
    let mid_phoneme = original.phonemes.len() / 2;

    let first = AsrSegment {
        index: original.index,
        start_time: original.start_time,
        end_time: mid_time,
        phonemes: original.phonemes[..mid_phoneme].to_vec(),
    };
    let second = AsrSegment {
        index: original.index + 1,
        start_time: mid_time,
        end_time: original.end_time,
        phonemes: original.phonemes[mid_phoneme..].to_vec(),
    };

    segments[idx] = first;
    segments.insert(idx + 1, second);
    for segment in segments.iter_mut().skip(idx + 2) {
        segment.index += 1;
    }
}

/// Normalised Levenshtein distance: `edit / max(|a|, |b|)`, 0 for two empty
/// sequences.
pub fn normalized_distance(a: &[PhonemeId], b: &[PhonemeId]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()] as f64 / longest as f64
}
