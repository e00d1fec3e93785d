//! Qur'an script file loading
//!
//! Two JSON documents keyed by `"surah:ayah:word"`: the computation script
//! (canonical orthography, drives matching) and the display script (drives
//! rendered output). A third file carries per-ayah word counts for verse
//! markers; when absent the counts are derived from the script itself.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{AlignmentError, Result};

/// One word entry from a script file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEntry {
    pub surah: u8,
    pub ayah: u16,
    pub word: u16,
    pub text: String,
}

/// Per-surah, per-ayah word counts (for end-of-ayah markers).
pub type VerseWordCounts = HashMap<u8, HashMap<u16, u16>>;

/// The canonical text, ordered by `(surah, ayah, word)`, with display text
/// resolved per word.
#[derive(Debug, Clone)]
pub struct QuranScript {
    pub entries: Vec<ScriptWord>,
}

#[derive(Debug, Clone)]
pub struct ScriptWord {
    pub surah: u8,
    pub ayah: u16,
    pub word: u16,
    pub text: String,
    pub display_text: String,
}

/// End-of-ayah marker prefix; marker "words" are not real words.
const VERSE_MARKER_PREFIX: char = '\u{06DD}';

impl QuranScript {
    /// Loads the compute script, pairing each word with its display-script
    /// text (falling back to the compute text when missing).
    pub fn load(compute_path: &Path, display_path: &Path) -> Result<Self> {
        let compute = load_script_map(compute_path)?;
        let display = load_script_map(display_path)?;
        Ok(Self::from_maps(compute, display))
    }

    pub(crate) fn from_maps(
        compute: HashMap<String, ScriptEntry>,
        display: HashMap<String, ScriptEntry>,
    ) -> Self {
        let mut keys: Vec<&String> = compute.keys().collect();
        keys.sort_by_key(|k| parse_location_key(k));

        let mut entries = Vec::with_capacity(compute.len());
        for key in keys {
            let entry = &compute[key];
            if entry.text.starts_with(VERSE_MARKER_PREFIX) {
                continue;
            }
            let display_text = display
                .get(key)
                .map(|d| d.text.clone())
                .unwrap_or_else(|| entry.text.clone());
            entries.push(ScriptWord {
                surah: entry.surah,
                ayah: entry.ayah,
                word: entry.word,
                text: entry.text.clone(),
                display_text,
            });
        }

        info!(words = entries.len(), "Qur'an script loaded");
        Self { entries }
    }

    /// All words of one surah, in order.
    pub fn surah_words(&self, surah: u8) -> Vec<&ScriptWord> {
        self.entries.iter().filter(|w| w.surah == surah).collect()
    }

    /// Derives per-ayah word counts from the script ordering.
    pub fn verse_word_counts(&self) -> VerseWordCounts {
        let mut counts: VerseWordCounts = HashMap::new();
        for word in &self.entries {
            let ayahs = counts.entry(word.surah).or_default();
            let n = ayahs.entry(word.ayah).or_insert(0);
            *n = (*n).max(word.word);
        }
        counts
    }
}

fn load_script_map(path: &Path) -> Result<HashMap<String, ScriptEntry>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AlignmentError::corrupt(path, format!("read failed: {e}")))?;
    serde_json::from_str(&raw).map_err(|e| AlignmentError::corrupt(path, e))
}

/// Loads the per-surah word-count table:
/// `{ "<surah>": { "verses": [{ "verse": n, "num_words": m }, ...] } }`.
pub fn load_verse_word_counts(path: &Path) -> Result<VerseWordCounts> {
    #[derive(Deserialize)]
    struct SurahInfo {
        #[serde(default)]
        verses: Vec<VerseInfo>,
    }
    #[derive(Deserialize)]
    struct VerseInfo {
        verse: u16,
        #[serde(default)]
        num_words: u16,
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| AlignmentError::corrupt(path, format!("read failed: {e}")))?;
    let parsed: HashMap<String, SurahInfo> =
        serde_json::from_str(&raw).map_err(|e| AlignmentError::corrupt(path, e))?;

    let mut counts: VerseWordCounts = HashMap::new();
    for (surah, info) in parsed {
        let surah: u8 = surah
            .parse()
            .map_err(|_| AlignmentError::corrupt(path, format!("bad surah key {surah:?}")))?;
        let ayahs = counts.entry(surah).or_default();
        for verse in info.verses {
            ayahs.insert(verse.verse, verse.num_words);
        }
    }
    Ok(counts)
}

fn parse_location_key(key: &str) -> (u16, u16, u16) {
    let mut parts = key.split(':').map(|p| p.parse::<u16>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
