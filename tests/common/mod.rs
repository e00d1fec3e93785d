//! Shared fixtures: a synthetic mini-Qur'an reference store and scripted
//! acoustic backends.
//!
//! Every reference word gets four globally-unique phonemes, so any segment
//! of real content produces n-grams that vote for exactly one (surah, ayah)
//! and aligns exactly against its own words.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quran_aligner::audio::types::{RawVadOutput, SAMPLE_RATE};
use quran_aligner::reference::subcost::SubCostTable;
use quran_aligner::reference::types::{ChapterRecord, Word};
use quran_aligner::{
    AlignerConfig, AlignmentContext, AsrBackend, AsrModel, BackendError, Phonemizer,
    ReferenceStore, VadBackend,
};

/// Four unique phonemes for word `uid`.
pub fn word_phonemes(uid: usize) -> Vec<String> {
    ["a", "b", "c", "d"]
        .iter()
        .map(|suffix| format!("p{uid}{suffix}"))
        .collect()
}

fn word(surah: u8, ayah: u16, word_num: u16, uid: usize) -> Word {
    Word {
        text: format!("كلمة{uid}"),
        display_text: format!("كلمة{uid}"),
        phonemes: word_phonemes(uid),
        surah,
        ayah,
        word_num,
    }
}

/// Chapter layout of the synthetic corpus, as `(surah, ayahs)` where each
/// ayah is `(ayah_number, word_uids)`.
fn corpus() -> Vec<(u8, Vec<(u16, Vec<usize>)>)> {
    vec![
        (1, vec![(1, vec![100, 101, 102]), (2, vec![103, 104, 105])]),
        (2, vec![(1, vec![200, 201, 202]), (2, vec![203, 204, 205])]),
        (
            112,
            vec![
                (1, vec![1, 2, 3, 4]),
                (2, vec![5, 6]),
                (3, vec![7, 8, 9]),
                (4, vec![10, 11, 12, 13, 14]),
            ],
        ),
        (
            113,
            vec![(1, vec![300, 301, 302]), (2, vec![303, 304, 305])],
        ),
        (114, vec![(1, vec![310, 311, 312]), (2, vec![313, 314])]),
    ]
}

struct NoPhonemizer;

impl Phonemizer for NoPhonemizer {
    fn phonemize(&self, _word: &str) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("phonemizer not available in tests")
    }
}

pub fn test_store() -> Arc<ReferenceStore> {
    let records: Vec<ChapterRecord> = corpus()
        .into_iter()
        .map(|(surah, ayahs)| ChapterRecord {
            surah,
            words: ayahs
                .into_iter()
                .flat_map(|(ayah, uids)| {
                    uids.into_iter()
                        .enumerate()
                        .map(move |(i, uid)| word(surah, ayah, i as u16 + 1, uid))
                        .collect::<Vec<_>>()
                })
                .collect(),
        })
        .collect();

    Arc::new(
        ReferenceStore::from_records(records, 3, SubCostTable::default(), Arc::new(NoPhonemizer))
            .unwrap(),
    )
}

/// Phonemes of a whole ayah of the synthetic corpus.
pub fn ayah_phonemes(surah: u8, ayah: u16) -> Vec<String> {
    corpus()
        .into_iter()
        .find(|(s, _)| *s == surah)
        .into_iter()
        .flat_map(|(_, ayahs)| ayahs)
        .filter(|(a, _)| *a == ayah)
        .flat_map(|(_, uids)| uids)
        .flat_map(word_phonemes)
        .collect()
}

pub fn strs(phonemes: &[&str]) -> Vec<String> {
    phonemes.iter().map(|p| p.to_string()).collect()
}

/// VAD backend that replays a fixed raw interval list.
pub struct ScriptedVad {
    pub raw: RawVadOutput,
}

#[async_trait]
impl VadBackend for ScriptedVad {
    async fn segment(
        &self,
        _waveform: &[f32],
        _sample_rate: u32,
    ) -> Result<RawVadOutput, BackendError> {
        Ok(self.raw.clone())
    }
}

/// ASR backend keyed by clip length in samples; clip lengths in the fixture
/// are all distinct, so this survives batching and reordering.
pub struct ScriptedAsr {
    by_len: HashMap<usize, Vec<String>>,
}

#[async_trait]
impl AsrBackend for ScriptedAsr {
    async fn transcribe_batch(
        &self,
        clips: &[Vec<f32>],
    ) -> Result<Vec<Vec<String>>, BackendError> {
        Ok(clips
            .iter()
            .map(|clip| self.by_len.get(&clip.len()).cloned().unwrap_or_default())
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One recitation fixture: audio, raw VAD intervals, and the scripted ASR
/// output for each interval.
pub struct Fixture {
    pub audio: Vec<f32>,
    pub raw_vad: RawVadOutput,
    pub context: AlignmentContext,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Builds a recording where segment `i` occupies a one-second-plus interval
/// (every interval length distinct) and decodes to `segment_phonemes[i]`.
pub fn fixture(segment_phonemes: Vec<Vec<String>>) -> Fixture {
    init_tracing();
    let config = AlignerConfig::default();
    let sr = SAMPLE_RATE as u64;
    let mut intervals: Vec<(u64, u64)> = Vec::new();
    let mut by_len: HashMap<usize, Vec<String>> = HashMap::new();

    for (i, phonemes) in segment_phonemes.iter().enumerate() {
        let start = i as u64 * 2 * sr;
        // Distinct length per segment: 1 s plus i * 10 ms.
        let len = sr + i as u64 * 160;
        intervals.push((start, start + len));
        by_len.insert(len as usize, phonemes.clone());
    }

    let total_samples = (segment_phonemes.len() as u64 * 2 + 1) * sr;
    let raw_vad = RawVadOutput {
        is_complete: vec![true; intervals.len()],
        intervals,
    };

    let mut backends: HashMap<AsrModel, Arc<dyn AsrBackend>> = HashMap::new();
    backends.insert(AsrModel::Base, Arc::new(ScriptedAsr { by_len }));

    let context = AlignmentContext::new(
        test_store(),
        Arc::new(ScriptedVad {
            raw: raw_vad.clone(),
        }),
        backends,
        config,
    );

    Fixture {
        audio: vec![0.0; total_samples as usize],
        raw_vad,
        context,
    }
}

/// Default segmentation params that keep the fixture intervals intact.
pub fn params() -> quran_aligner::SegmentationParams {
    quran_aligner::SegmentationParams {
        min_silence_ms: 200,
        min_speech_ms: 100,
        pad_ms: 0,
        asr_model: AsrModel::Base,
    }
}
