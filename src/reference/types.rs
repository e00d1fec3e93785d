//! Reference-side type definitions
//!
//! Words, chapter references and the phoneme vocabulary shared by the DP
//! engine, the anchor and the special-segment detector.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Interned phoneme identifier. Equality of ids is equality of phonemes.
pub type PhonemeId = u32;

/// Sentinel word tag for phonemes prepended to a reference window (the
/// Basmala-fused retry). Never a real word index.
pub const PREFIX_WORD: i64 = -1;

/// Append-only phoneme string interner.
///
/// Built once from the chapter references, the substitution-cost table and
/// the hard-coded special sequences; per-run out-of-vocabulary phonemes are
/// handled by [`RunVocab`](crate::reference::store::RunVocab) overlays.
#[derive(Debug, Default, Clone)]
pub struct PhonemeVocab {
    ids: HashMap<String, PhonemeId>,
    names: Vec<String>,
}

impl PhonemeVocab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, phoneme: &str) -> PhonemeId {
        if let Some(&id) = self.ids.get(phoneme) {
            return id;
        }
        let id = self.names.len() as PhonemeId;
        self.names.push(phoneme.to_string());
        self.ids.insert(phoneme.to_string(), id);
        id
    }

    pub fn lookup(&self, phoneme: &str) -> Option<PhonemeId> {
        self.ids.get(phoneme).copied()
    }

    pub fn name(&self, id: PhonemeId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A single reference word with its phonemisation and canonical location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    /// Computation-script text (drives matching and refs).
    pub text: String,
    /// Display-script text (drives rendered output; falls back to `text`).
    pub display_text: String,
    pub phonemes: Vec<String>,
    pub surah: u8,
    pub ayah: u16,
    /// 1-based position within the ayah.
    pub word_num: u16,
}

impl Word {
    /// Canonical `surah:ayah:word` location string.
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.surah, self.ayah, self.word_num)
    }
}

/// Flattened, interned reference for one surah.
///
/// Invariants: `flat_phonemes` is the concatenation of the per-word phoneme
/// lists; `word_phone_offsets` has `words.len() + 1` non-decreasing entries
/// with a sentinel at the end; `flat_phone_to_word[word_phone_offsets[i]..
/// word_phone_offsets[i + 1]]` is uniformly `i`.
#[derive(Debug, Clone)]
pub struct ChapterReference {
    pub surah: u8,
    pub words: Vec<Word>,
    pub avg_phones_per_word: f64,
    pub flat_phonemes: Vec<PhonemeId>,
    pub flat_phone_to_word: Vec<u32>,
    pub word_phone_offsets: Vec<u32>,
}

impl ChapterReference {
    /// Builds the flattened arrays from an ayah-ordered word list.
    pub fn build(surah: u8, words: Vec<Word>, vocab: &mut PhonemeVocab) -> Self {
        let mut flat_phonemes = Vec::new();
        let mut flat_phone_to_word = Vec::new();
        let mut word_phone_offsets = Vec::with_capacity(words.len() + 1);

        for (word_idx, word) in words.iter().enumerate() {
            word_phone_offsets.push(flat_phonemes.len() as u32);
            for phoneme in &word.phonemes {
                flat_phonemes.push(vocab.intern(phoneme));
                flat_phone_to_word.push(word_idx as u32);
            }
        }
        word_phone_offsets.push(flat_phonemes.len() as u32);

        let avg_phones_per_word = if words.is_empty() {
            0.0
        } else {
            flat_phonemes.len() as f64 / words.len() as f64
        };

        Self {
            surah,
            words,
            avg_phones_per_word,
            flat_phonemes,
            flat_phone_to_word,
            word_phone_offsets,
        }
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Word index of the first word of `ayah`, or 0 if the ayah is unknown.
    pub fn first_word_of_ayah(&self, ayah: u16) -> usize {
        self.words
            .iter()
            .position(|w| w.ayah == ayah)
            .unwrap_or(0)
    }

    /// Reference string for an inclusive word range, e.g. `2:255:1-2:255:5`.
    pub fn range_ref(&self, start_word: usize, end_word: usize) -> String {
        let start = self.words[start_word].location();
        let end = self.words[end_word].location();
        if start == end {
            start
        } else {
            format!("{start}-{end}")
        }
    }

    /// True when `word_idx` is the last word of its ayah.
    pub fn is_ayah_end(&self, word_idx: usize) -> bool {
        match self.words.get(word_idx + 1) {
            Some(next) => next.ayah != self.words[word_idx].ayah,
            None => true,
        }
    }

    /// Last word index of the ayah containing `word_idx`.
    pub fn ayah_end_word(&self, word_idx: usize) -> usize {
        let ayah = self.words[word_idx].ayah;
        let mut end = word_idx;
        while end + 1 < self.words.len() && self.words[end + 1].ayah == ayah {
            end += 1;
        }
        end
    }
}

/// Serialisable form of a chapter reference (the binary cache stores phoneme
/// strings, not interned ids, so the cache is stable across vocab changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub surah: u8,
    pub words: Vec<Word>,
}

impl ChapterRecord {
    pub fn into_reference(self, vocab: &mut PhonemeVocab) -> ChapterReference {
        ChapterReference::build(self.surah, self.words, vocab)
    }

    pub fn from_reference(reference: &ChapterReference) -> Self {
        Self {
            surah: reference.surah,
            words: reference.words.clone(),
        }
    }
}
