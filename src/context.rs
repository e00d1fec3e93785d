//! Alignment context
//!
//! Owns the shared reference store, the acoustic backends and the
//! configuration, and exposes the three run entry points: `align` (full
//! pipeline), `resegment` (reuse cached VAD output) and `realign`
//! (caller-provided intervals, no VAD).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::align::pipeline::run_alignment;
use crate::align::report::assemble_report;
use crate::align::special::SpecialLexicon;
use crate::align::split::{split_fused_segments, ForcedAligner};
use crate::align::types::AlignmentReport;
use crate::audio::asr::{run_asr, AsrBackend};
use crate::audio::types::{AsrSegment, RawVadOutput, SpeechInterval, SAMPLE_RATE};
use crate::audio::vad::{clean_speech_intervals, VadBackend};
use crate::config::{AlignerConfig, AsrModel, SegmentationParams};
use crate::error::{AlignmentError, BackendError, Result};
use crate::reference::store::{ReferenceStore, RunVocab};

/// Co-operative cancellation flag, observed between segments.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Host-owned pipeline value; shareable across concurrent runs.
pub struct AlignmentContext {
    store: Arc<ReferenceStore>,
    vad: Arc<dyn VadBackend>,
    asr_backends: HashMap<AsrModel, Arc<dyn AsrBackend>>,
    forced_aligner: Option<Arc<dyn ForcedAligner>>,
    config: AlignerConfig,
}

impl AlignmentContext {
    pub fn new(
        store: Arc<ReferenceStore>,
        vad: Arc<dyn VadBackend>,
        asr_backends: HashMap<AsrModel, Arc<dyn AsrBackend>>,
        config: AlignerConfig,
    ) -> Self {
        Self {
            store,
            vad,
            asr_backends,
            forced_aligner: None,
            config,
        }
    }

    /// Attaches the optional forced-alignment service used to split fused
    /// segments.
    pub fn with_forced_aligner(mut self, aligner: Arc<dyn ForcedAligner>) -> Self {
        self.forced_aligner = Some(aligner);
        self
    }

    pub fn store(&self) -> &Arc<ReferenceStore> {
        &self.store
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Full pipeline: VAD, cleaning, ASR, specials, anchor, alignment.
    pub async fn align(
        &self,
        audio: &[f32],
        params: &SegmentationParams,
    ) -> Result<AlignmentReport> {
        self.align_cancellable(audio, params, &CancelToken::new())
            .await
    }

    pub async fn align_cancellable(
        &self,
        audio: &[f32],
        params: &SegmentationParams,
        cancel: &CancelToken,
    ) -> Result<AlignmentReport> {
        info!(
            duration_s = audio.len() as f64 / SAMPLE_RATE as f64,
            "starting alignment run"
        );
        let raw = self.vad.segment(audio, SAMPLE_RATE).await?;
        self.resegment_cancellable(&raw, audio, params, cancel).await
    }

    /// Re-runs cleaning and everything downstream on cached raw VAD output.
    pub async fn resegment(
        &self,
        raw_vad: &RawVadOutput,
        audio: &[f32],
        params: &SegmentationParams,
    ) -> Result<AlignmentReport> {
        self.resegment_cancellable(raw_vad, audio, params, &CancelToken::new())
            .await
    }

    pub async fn resegment_cancellable(
        &self,
        raw_vad: &RawVadOutput,
        audio: &[f32],
        params: &SegmentationParams,
        cancel: &CancelToken,
    ) -> Result<AlignmentReport> {
        let intervals = clean_speech_intervals(raw_vad, params, audio.len() as u64);
        if intervals.is_empty() {
            warn!("no speech segments detected");
            return Ok(no_speech_report());
        }
        self.run_pipeline(audio, &intervals, params.asr_model, cancel)
            .await
    }

    /// Runs ASR and alignment on caller-provided intervals, bypassing VAD.
    pub async fn realign(
        &self,
        audio: &[f32],
        intervals: &[(f64, f64)],
        asr_model: AsrModel,
    ) -> Result<AlignmentReport> {
        let intervals: Vec<SpeechInterval> = intervals
            .iter()
            .map(|&(start, end)| SpeechInterval { start, end })
            .collect();
        if intervals.is_empty() {
            return Ok(no_speech_report());
        }
        self.run_pipeline(audio, &intervals, asr_model, &CancelToken::new())
            .await
    }

    async fn run_pipeline(
        &self,
        audio: &[f32],
        intervals: &[SpeechInterval],
        asr_model: AsrModel,
        cancel: &CancelToken,
    ) -> Result<AlignmentReport> {
        let backend = self.asr_backends.get(&asr_model).ok_or_else(|| {
            AlignmentError::AcousticBackend(BackendError::Asr {
                message: format!("no backend registered for {asr_model:?}"),
            })
        })?;

        // ASR over the cleaned intervals.
        let clips: Vec<Vec<f32>> = intervals
            .iter()
            .map(|interval| clip(audio, interval))
            .collect();
        let phoneme_lists = run_asr(backend.as_ref(), clips, &self.config.batch).await?;
        info!(segments = phoneme_lists.len(), "phoneme ASR complete");

        let mut segments: Vec<AsrSegment> = intervals
            .iter()
            .zip(phoneme_lists)
            .enumerate()
            .map(|(index, (interval, phonemes))| AsrSegment {
                index: index as u32,
                start_time: interval.start,
                end_time: interval.end,
                phonemes,
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(AlignmentError::Cancelled);
        }

        // Opening invocations, then the global anchor.
        let mut run = RunVocab::new(&self.store);
        let lexicon = SpecialLexicon::new(&mut run);
        let opening = lexicon.detect_opening(
            &mut segments,
            &mut run,
            self.config.special.special_threshold,
        );

        let quran_ids: Vec<Vec<crate::reference::types::PhonemeId>> = segments
            [opening.first_quran_idx..]
            .iter()
            .map(|s| run.resolve_all(&s.phonemes))
            .collect();
        let (surah, ayah) = crate::align::anchor::find_anchor_by_voting(
            &quran_ids,
            self.store.ngram_index(),
            &self.config.anchor,
        );
        if surah == 0 {
            return Err(AlignmentError::AnchorFailed);
        }
        info!(surah, ayah, "anchored");

        let output = run_alignment(
            &self.store,
            &self.config,
            &segments,
            &opening,
            surah,
            ayah,
            &mut run,
            &lexicon,
            cancel,
        )?;

        let mut report = assemble_report(
            &segments,
            &output.results,
            &output.spans,
            &output.gap_segments,
            &output.merged_into,
            output.stats,
            &self.config.report,
            self.store.verse_word_counts(),
            Some(surah),
            Vec::new(),
        );

        split_fused_segments(&mut report, audio, self.forced_aligner.as_deref()).await;
        Ok(report)
    }
}

fn clip(audio: &[f32], interval: &SpeechInterval) -> Vec<f32> {
    let start = (interval.start * SAMPLE_RATE as f64).round() as usize;
    let end = ((interval.end * SAMPLE_RATE as f64).round() as usize).min(audio.len());
    audio.get(start..end).map(<[f32]>::to_vec).unwrap_or_default()
}

fn no_speech_report() -> AlignmentReport {
    AlignmentReport {
        warnings: vec!["no speech segments detected in audio".to_string()],
        ..Default::default()
    }
}
