//! Reference store
//!
//! Serves chapter references, the n-gram index and the substitution-cost
//! table. Everything is loaded once and immutable afterwards; the store can
//! be shared read-only across concurrent alignment runs. Missing binary
//! caches are not fatal — chapters are built on demand from the script via
//! the phonemizer, and the n-gram index is rebuilt from the chapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{AlignmentError, Result};
use crate::reference::ngram::NgramIndex;
use crate::reference::script::{load_verse_word_counts, QuranScript, VerseWordCounts};
use crate::reference::subcost::SubCostTable;
use crate::reference::types::{
    ChapterRecord, ChapterReference, PhonemeId, PhonemeVocab, Word,
};

pub const SURAH_COUNT: u8 = 114;

/// External phonemiser used only when a chapter must be built on demand.
pub trait Phonemizer: Send + Sync {
    fn phonemize(&self, word: &str) -> anyhow::Result<Vec<String>>;
}

/// Locations of the reference data files. Any of them may be absent; the
/// store falls back to on-demand construction where it can.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDataPaths {
    pub chapter_cache: Option<PathBuf>,
    pub ngram_index: Option<PathBuf>,
    pub sub_costs: Option<PathBuf>,
    pub script_compute: Option<PathBuf>,
    pub script_display: Option<PathBuf>,
    pub surah_info: Option<PathBuf>,
}

pub struct ReferenceStore {
    vocab: RwLock<PhonemeVocab>,
    chapters: Vec<OnceCell<Arc<ChapterReference>>>,
    ngram: NgramIndex,
    sub_costs: SubCostTable,
    verse_counts: VerseWordCounts,
    script: Option<QuranScript>,
    phonemizer: Arc<dyn Phonemizer>,
}

impl ReferenceStore {
    /// Opens the store from data files, falling back to on-demand
    /// construction for anything missing.
    pub fn open(
        paths: &ReferenceDataPaths,
        phonemizer: Arc<dyn Phonemizer>,
        ngram_size: usize,
    ) -> Result<Self> {
        let mut vocab = PhonemeVocab::new();

        let script = match (&paths.script_compute, &paths.script_display) {
            (Some(compute), Some(display)) => Some(QuranScript::load(compute, display)?),
            _ => None,
        };

        let chapters: Vec<OnceCell<Arc<ChapterReference>>> =
            (0..SURAH_COUNT).map(|_| OnceCell::new()).collect();

        if let Some(cache_path) = &paths.chapter_cache {
            let records = load_chapter_cache(cache_path)?;
            info!(chapters = records.len(), "chapter cache loaded");
            for (surah, record) in records {
                if !(1..=SURAH_COUNT).contains(&surah) {
                    return Err(AlignmentError::corrupt(
                        cache_path,
                        format!("surah {surah} out of range"),
                    ));
                }
                let reference = Arc::new(record.into_reference(&mut vocab));
                let _ = chapters[surah as usize - 1].set(reference);
            }
        }

        let ngram = match &paths.ngram_index {
            Some(path) => NgramIndex::load(path, &mut vocab)?,
            None => {
                warn!("n-gram index cache missing, rebuilding from chapters");
                let mut built: Vec<Arc<ChapterReference>> = Vec::new();
                for surah in 1..=SURAH_COUNT {
                    let cell = &chapters[surah as usize - 1];
                    if cell.get().is_none() {
                        let reference = build_chapter(
                            surah,
                            script.as_ref(),
                            phonemizer.as_ref(),
                            &mut vocab,
                        )?;
                        let _ = cell.set(Arc::new(reference));
                    }
                    built.push(cell.get().cloned().ok_or_else(|| {
                        AlignmentError::ReferenceUnavailable {
                            surah,
                            reason: "chapter build produced no reference".into(),
                        }
                    })?);
                }
                let refs: Vec<&ChapterReference> = built.iter().map(Arc::as_ref).collect();
                NgramIndex::build(&refs, ngram_size)
            }
        };

        let sub_costs = match &paths.sub_costs {
            Some(path) => SubCostTable::load(path, &mut vocab)?,
            None => {
                warn!("substitution cost file missing, using default cost only");
                SubCostTable::default()
            }
        };

        let verse_counts = match &paths.surah_info {
            Some(path) => load_verse_word_counts(path)?,
            None => match &script {
                Some(script) => script.verse_word_counts(),
                None => derive_verse_counts(&chapters),
            },
        };

        Ok(Self {
            vocab: RwLock::new(vocab),
            chapters,
            ngram,
            sub_costs,
            verse_counts,
            script,
            phonemizer,
        })
    }

    /// Builds a store directly from chapter records (offline tooling, tests).
    pub fn from_records(
        records: Vec<ChapterRecord>,
        ngram_size: usize,
        sub_costs: SubCostTable,
        phonemizer: Arc<dyn Phonemizer>,
    ) -> Result<Self> {
        let mut vocab = PhonemeVocab::new();
        let chapters: Vec<OnceCell<Arc<ChapterReference>>> =
            (0..SURAH_COUNT).map(|_| OnceCell::new()).collect();
        let mut built: Vec<Arc<ChapterReference>> = Vec::new();
        for record in records {
            let surah = record.surah;
            if !(1..=SURAH_COUNT).contains(&surah) {
                return Err(AlignmentError::ReferenceUnavailable {
                    surah,
                    reason: "surah out of range".into(),
                });
            }
            let reference = Arc::new(record.into_reference(&mut vocab));
            built.push(reference.clone());
            let _ = chapters[surah as usize - 1].set(reference);
        }
        let refs: Vec<&ChapterReference> = built.iter().map(Arc::as_ref).collect();
        let ngram = NgramIndex::build(&refs, ngram_size);
        let verse_counts = derive_verse_counts(&chapters);

        Ok(Self {
            vocab: RwLock::new(vocab),
            chapters,
            ngram,
            sub_costs,
            verse_counts,
            script: None,
            phonemizer,
        })
    }

    /// Chapter reference with stable identity for the store's lifetime.
    /// Builds and caches the chapter on first access when not precomputed.
    pub fn chapter(&self, surah: u8) -> Result<Arc<ChapterReference>> {
        if !(1..=SURAH_COUNT).contains(&surah) {
            return Err(AlignmentError::ReferenceUnavailable {
                surah,
                reason: "surah out of range".into(),
            });
        }
        let cell = &self.chapters[surah as usize - 1];
        cell.get_or_try_init(|| {
            warn!(surah, "building chapter reference at runtime (cache miss)");
            let mut vocab = self.vocab.write().unwrap();
            build_chapter(surah, self.script.as_ref(), self.phonemizer.as_ref(), &mut vocab)
                .map(Arc::new)
        })
        .cloned()
    }

    pub fn ngram_index(&self) -> &NgramIndex {
        &self.ngram
    }

    /// 0 for identical phonemes, the table value if present, else `default`.
    pub fn sub_cost(&self, a: PhonemeId, b: PhonemeId, default: f64) -> f64 {
        self.sub_costs.cost(a, b, default)
    }

    pub fn verse_word_counts(&self) -> &VerseWordCounts {
        &self.verse_counts
    }

    pub fn lookup_phoneme(&self, phoneme: &str) -> Option<PhonemeId> {
        self.vocab.read().unwrap().lookup(phoneme)
    }

    /// Snapshot of the vocabulary size (for diagnostics).
    pub fn vocab_len(&self) -> usize {
        self.vocab.read().unwrap().len()
    }
}

/// Per-run phoneme resolver. ASR output can contain phonemes the reference
/// vocabulary never produced; those get run-local ids allocated downward
/// from `u32::MAX` so they can never collide with store ids.
pub struct RunVocab<'a> {
    store: &'a ReferenceStore,
    overlay: HashMap<String, PhonemeId>,
    next_overlay: PhonemeId,
}

impl<'a> RunVocab<'a> {
    pub fn new(store: &'a ReferenceStore) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
            next_overlay: PhonemeId::MAX,
        }
    }

    pub fn resolve(&mut self, phoneme: &str) -> PhonemeId {
        if let Some(id) = self.store.lookup_phoneme(phoneme) {
            return id;
        }
        if let Some(&id) = self.overlay.get(phoneme) {
            return id;
        }
        let id = self.next_overlay;
        self.next_overlay -= 1;
        self.overlay.insert(phoneme.to_string(), id);
        id
    }

    pub fn resolve_all(&mut self, phonemes: &[String]) -> Vec<PhonemeId> {
        phonemes.iter().map(|p| self.resolve(p)).collect()
    }
}

fn build_chapter(
    surah: u8,
    script: Option<&QuranScript>,
    phonemizer: &dyn Phonemizer,
    vocab: &mut PhonemeVocab,
) -> Result<ChapterReference> {
    let script = script.ok_or_else(|| AlignmentError::ReferenceUnavailable {
        surah,
        reason: "no chapter cache and no script files".into(),
    })?;

    let script_words = script.surah_words(surah);
    if script_words.is_empty() {
        return Err(AlignmentError::ReferenceUnavailable {
            surah,
            reason: "surah absent from script".into(),
        });
    }

    let mut words = Vec::with_capacity(script_words.len());
    for sw in script_words {
        let phonemes = phonemizer.phonemize(&sw.text).map_err(|e| {
            AlignmentError::ReferenceUnavailable {
                surah,
                reason: format!("phonemizer failed on {:?}: {e}", sw.text),
            }
        })?;
        words.push(Word {
            text: sw.text.clone(),
            display_text: sw.display_text.clone(),
            phonemes,
            surah: sw.surah,
            ayah: sw.ayah,
            word_num: sw.word,
        });
    }

    Ok(ChapterReference::build(surah, words, vocab))
}

fn derive_verse_counts(chapters: &[OnceCell<Arc<ChapterReference>>]) -> VerseWordCounts {
    let mut counts: VerseWordCounts = HashMap::new();
    for cell in chapters {
        if let Some(chapter) = cell.get() {
            let ayahs = counts.entry(chapter.surah).or_default();
            for word in &chapter.words {
                let n = ayahs.entry(word.ayah).or_insert(0);
                *n = (*n).max(word.word_num);
            }
        }
    }
    counts
}

pub fn load_chapter_cache(path: &Path) -> Result<HashMap<u8, ChapterRecord>> {
    let bytes = std::fs::read(path)
        .map_err(|e| AlignmentError::corrupt(path, format!("read failed: {e}")))?;
    bincode::deserialize(&bytes).map_err(|e| AlignmentError::corrupt(path, e))
}

/// Writes the chapter cache (offline tooling; runtime code only reads).
pub fn save_chapter_cache(path: &Path, records: &HashMap<u8, ChapterRecord>) -> Result<()> {
    let bytes = bincode::serialize(records).map_err(|e| AlignmentError::corrupt(path, e))?;
    std::fs::write(path, bytes)
        .map_err(|e| AlignmentError::corrupt(path, format!("write failed: {e}")))?;
    Ok(())
}
