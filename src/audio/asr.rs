//! Phoneme ASR driver
//!
//! Wraps an [`AsrBackend`] with duration-sorted dynamic batching and CTC
//! greedy-decode post-processing. Output order always matches input order.

use async_trait::async_trait;
use tracing::debug;

use crate::audio::types::SAMPLE_RATE;
use crate::config::BatchConfig;
use crate::error::BackendError;

/// Word-delimiter token emitted by the CTC vocabulary.
pub const WORD_DELIMITER: &str = "|";

/// Acoustic phoneme ASR backend. Each output is the CTC-collapsed phoneme
/// list for its clip, same length and order as the input.
#[async_trait]
pub trait AsrBackend: Send + Sync {
    async fn transcribe_batch(
        &self,
        clips: &[Vec<f32>],
    ) -> Result<Vec<Vec<String>>, BackendError>;

    fn name(&self) -> &str;
}

/// CTC greedy-decode collapse over a token sequence: drops the pad/blank
/// token and the word delimiter, and collapses consecutive duplicates.
/// Backends built on raw logit-argmax token streams call this.
pub fn collapse_ctc_tokens<S: AsRef<str>>(tokens: &[S], pad_token: &str) -> Vec<String> {
    let mut collapsed: Vec<String> = Vec::new();
    let mut prev: Option<&str> = None;
    for token in tokens {
        let token = token.as_ref();
        if token == pad_token || token == WORD_DELIMITER {
            prev = Some(token);
            continue;
        }
        if prev == Some(token) {
            continue;
        }
        collapsed.push(token.to_string());
        prev = Some(token);
    }
    collapsed
}

/// Transcribes the clips in duration-sorted dynamic batches, restoring input
/// order before returning.
pub async fn run_asr(
    backend: &dyn AsrBackend,
    clips: Vec<Vec<f32>>,
    config: &BatchConfig,
) -> Result<Vec<Vec<String>>, BackendError> {
    if clips.is_empty() {
        return Ok(Vec::new());
    }

    let durations: Vec<f64> = clips
        .iter()
        .map(|c| c.len() as f64 / SAMPLE_RATE as f64)
        .collect();

    let mut sorted_indices: Vec<usize> = (0..clips.len()).collect();
    sorted_indices.sort_by(|&a, &b| durations[a].total_cmp(&durations[b]));

    let batches = build_batches(&sorted_indices, &durations, config);
    debug!(
        clips = clips.len(),
        batches = batches.len(),
        backend = backend.name(),
        "running phoneme ASR"
    );

    let mut slots: Vec<Option<Vec<f32>>> = clips.into_iter().map(Some).collect();
    let mut results: Vec<Vec<String>> = vec![Vec::new(); slots.len()];

    for batch in &batches {
        let batch_clips: Vec<Vec<f32>> = batch
            .iter()
            .map(|&i| slots[i].take().unwrap_or_default())
            .collect();
        let decoded = backend.transcribe_batch(&batch_clips).await?;
        if decoded.len() != batch_clips.len() {
            return Err(BackendError::Asr {
                message: format!(
                    "backend returned {} results for {} clips",
                    decoded.len(),
                    batch_clips.len()
                ),
            });
        }
        for (&slot, phonemes) in batch.iter().zip(decoded) {
            results[slot] = phonemes;
        }
    }

    Ok(results)
}

/// Builds batches from duration-sorted indices under two limits: total
/// seconds per batch and padding waste `1 − Σd / (n · max d)`. A batch is
/// never cut below `min_batch_size`, which takes precedence.
fn build_batches(
    sorted_indices: &[usize],
    durations: &[f64],
    config: &BatchConfig,
) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_seconds = 0.0;

    for &i in sorted_indices {
        let duration = durations[i];
        if current.is_empty() {
            current.push(i);
            current_seconds = duration;
            continue;
        }

        // Ascending sort means the candidate is the new longest clip.
        let new_seconds = current_seconds + duration;
        let new_size = current.len() + 1;
        let pad_waste = if duration > 0.0 {
            1.0 - new_seconds / (new_size as f64 * duration)
        } else {
            0.0
        };

        let over_limit =
            new_seconds > config.max_batch_seconds || pad_waste > config.max_pad_waste;

        if over_limit && current.len() >= config.min_batch_size {
            batches.push(std::mem::take(&mut current));
            current.push(i);
            current_seconds = duration;
        } else {
            current.push(i);
            current_seconds = new_seconds;
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
