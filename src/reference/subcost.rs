//! Phoneme substitution cost table
//!
//! JSON layout: top-level sections whose values are objects mapping
//! `"a|b"` to a cost. Sections group related confusions (emphatics, long
//! vowels, ...); unknown sections are accepted and merged. Both orderings
//! of each pair are stored.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AlignmentError, Result};
use crate::reference::types::{PhonemeId, PhonemeVocab};

/// Symmetric per-pair substitution costs over interned phonemes.
#[derive(Debug, Default, Clone)]
pub struct SubCostTable {
    costs: HashMap<(PhonemeId, PhonemeId), f64>,
}

impl SubCostTable {
    /// Cost of substituting `a` for `b`: 0 for identical phonemes, the table
    /// value when present, otherwise `default_cost`.
    pub fn cost(&self, a: PhonemeId, b: PhonemeId, default_cost: f64) -> f64 {
        if a == b {
            return 0.0;
        }
        self.costs.get(&(a, b)).copied().unwrap_or(default_cost)
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn insert_symmetric(&mut self, a: PhonemeId, b: PhonemeId, cost: f64) {
        self.costs.insert((a, b), cost);
        self.costs.insert((b, a), cost);
    }

    /// Loads the JSON file, interning any phonemes it introduces.
    pub fn load(path: &Path, vocab: &mut PhonemeVocab) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::corrupt(path, format!("read failed: {e}")))?;
        let sections: HashMap<String, HashMap<String, f64>> =
            serde_json::from_str(&raw).map_err(|e| AlignmentError::corrupt(path, e))?;

        let mut table = Self::default();
        for (section, pairs) in &sections {
            for (key, &cost) in pairs {
                let (a, b) = key.split_once('|').ok_or_else(|| {
                    AlignmentError::corrupt(
                        path,
                        format!("section {section:?}: pair key {key:?} missing '|'"),
                    )
                })?;
                if a.is_empty() || b.is_empty() {
                    return Err(AlignmentError::corrupt(
                        path,
                        format!("section {section:?}: pair key {key:?} has an empty side"),
                    ));
                }
                let a = vocab.intern(a);
                let b = vocab.intern(b);
                table.insert_symmetric(a, b, cost);
            }
        }
        Ok(table)
    }
}
