//! Qur'an-wide phoneme n-gram index
//!
//! Maps each observed n-gram to its `(surah, ayah)` occurrences and total
//! count. Built offline and shipped as a binary cache; rebuilt from the
//! chapter references when the cache is missing.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AlignmentError, Result};
use crate::reference::types::{ChapterReference, PhonemeId, PhonemeVocab};

/// Read-only n-gram index over interned phonemes.
#[derive(Debug, Clone)]
pub struct NgramIndex {
    pub n: usize,
    pub positions: HashMap<Vec<PhonemeId>, Vec<(u8, u16)>>,
    pub counts: HashMap<Vec<PhonemeId>, u32>,
    pub total_ngrams: u64,
}

impl NgramIndex {
    /// Builds the index from chapter references. Each n-gram is taken over a
    /// chapter's flat phoneme stream and attributed to the ayah of its first
    /// phoneme.
    pub fn build(chapters: &[&ChapterReference], n: usize) -> Self {
        let mut positions: HashMap<Vec<PhonemeId>, Vec<(u8, u16)>> = HashMap::new();
        let mut total_ngrams = 0u64;

        for chapter in chapters {
            let phones = &chapter.flat_phonemes;
            if phones.len() < n {
                continue;
            }
            for start in 0..=(phones.len() - n) {
                let gram = phones[start..start + n].to_vec();
                let word = chapter.flat_phone_to_word[start] as usize;
                let ayah = chapter.words[word].ayah;
                positions.entry(gram).or_default().push((chapter.surah, ayah));
                total_ngrams += 1;
            }
        }

        let counts = positions
            .iter()
            .map(|(gram, occurrences)| (gram.clone(), occurrences.len() as u32))
            .collect();

        info!(
            unique = positions.len(),
            total = total_ngrams,
            n, "n-gram index built"
        );

        Self {
            n,
            positions,
            counts,
            total_ngrams,
        }
    }

    pub fn load(path: &Path, vocab: &mut PhonemeVocab) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AlignmentError::corrupt(path, format!("read failed: {e}")))?;
        let record: NgramIndexRecord =
            bincode::deserialize(&bytes).map_err(|e| AlignmentError::corrupt(path, e))?;
        Ok(record.into_index(vocab))
    }

    pub fn save(&self, path: &Path, vocab: &PhonemeVocab) -> Result<()> {
        let record = NgramIndexRecord::from_index(self, vocab);
        let bytes =
            bincode::serialize(&record).map_err(|e| AlignmentError::corrupt(path, e))?;
        std::fs::write(path, bytes)
            .map_err(|e| AlignmentError::corrupt(path, format!("write failed: {e}")))?;
        Ok(())
    }
}

/// Cache layout: phoneme strings rather than interned ids, so the file is
/// independent of vocab construction order.
#[derive(Debug, Serialize, Deserialize)]
pub struct NgramIndexRecord {
    pub n: usize,
    pub total_ngrams: u64,
    pub entries: Vec<(Vec<String>, Vec<(u8, u16)>)>,
}

impl NgramIndexRecord {
    pub fn from_index(index: &NgramIndex, vocab: &PhonemeVocab) -> Self {
        let mut entries: Vec<(Vec<String>, Vec<(u8, u16)>)> = index
            .positions
            .iter()
            .map(|(gram, occurrences)| {
                let named = gram
                    .iter()
                    .map(|&id| vocab.name(id).unwrap_or_default().to_string())
                    .collect();
                (named, occurrences.clone())
            })
            .collect();
        entries.sort();
        Self {
            n: index.n,
            total_ngrams: index.total_ngrams,
            entries,
        }
    }

    pub fn into_index(self, vocab: &mut PhonemeVocab) -> NgramIndex {
        let mut positions = HashMap::with_capacity(self.entries.len());
        let mut counts = HashMap::with_capacity(self.entries.len());
        for (named, occurrences) in self.entries {
            let gram: Vec<PhonemeId> = named.iter().map(|p| vocab.intern(p)).collect();
            counts.insert(gram.clone(), occurrences.len() as u32);
            positions.insert(gram, occurrences);
        }
        NgramIndex {
            n: self.n,
            positions,
            counts,
            total_ngrams: self.total_ngrams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::types::Word;

    fn word(surah: u8, ayah: u16, word_num: u16, phonemes: &[&str]) -> Word {
        Word {
            text: String::new(),
            display_text: String::new(),
            phonemes: phonemes.iter().map(|p| p.to_string()).collect(),
            surah,
            ayah,
            word_num,
        }
    }

    #[test]
    fn counts_match_positions() {
        let mut vocab = PhonemeVocab::new();
        let chapter = ChapterReference::build(
            7,
            vec![word(7, 1, 1, &["a", "b", "a"]), word(7, 2, 1, &["b", "a", "b"])],
            &mut vocab,
        );
        let index = NgramIndex::build(&[&chapter], 2);

        // Flat stream: a b a b a b -> five bigrams.
        assert_eq!(index.total_ngrams, 5);
        let ab = vec![vocab.lookup("a").unwrap(), vocab.lookup("b").unwrap()];
        assert_eq!(index.counts[&ab], 3);
        assert_eq!(index.positions[&ab].len(), 3);
        // The bigram starting at the fourth phoneme belongs to ayah 2.
        assert!(index.positions[&ab].contains(&(7, 2)));
    }

    #[test]
    fn cache_round_trips() {
        let mut vocab = PhonemeVocab::new();
        let chapter = ChapterReference::build(
            3,
            vec![word(3, 1, 1, &["x", "y", "z", "x", "y"])],
            &mut vocab,
        );
        let index = NgramIndex::build(&[&chapter], 3);

        let file = tempfile::NamedTempFile::new().unwrap();
        index.save(file.path(), &vocab).unwrap();

        let mut fresh_vocab = PhonemeVocab::new();
        let loaded = NgramIndex::load(file.path(), &mut fresh_vocab).unwrap();
        assert_eq!(loaded.n, index.n);
        assert_eq!(loaded.total_ngrams, index.total_ngrams);
        assert_eq!(loaded.positions.len(), index.positions.len());

        let xyz: Vec<PhonemeId> = ["x", "y", "z"]
            .iter()
            .map(|p| fresh_vocab.lookup(p).unwrap())
            .collect();
        assert_eq!(loaded.positions[&xyz], vec![(3, 1)]);
    }
}
