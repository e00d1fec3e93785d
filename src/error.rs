//! Error taxonomy for the alignment pipeline
//!
//! Per-segment alignment failures are not errors: they are recovered locally
//! and surfaced on the segment itself. Everything here terminates the run.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the acoustic backends (VAD / ASR / forced aligner).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("VAD inference failed: {message}")]
    Vad { message: String },

    #[error("ASR inference failed: {message}")]
    Asr { message: String },

    #[error("forced alignment failed: {message}")]
    ForcedAlignment { message: String },

    #[error("GPU quota exhausted")]
    QuotaExhausted,
}

/// Run-fatal alignment errors.
#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("could not anchor to any chapter: no n-gram matches found")]
    AnchorFailed,

    #[error("chapter reference unavailable for surah {surah}: {reason}")]
    ReferenceUnavailable { surah: u8, reason: String },

    #[error("acoustic backend failed: {0}")]
    AcousticBackend(#[from] BackendError),

    #[error("reference data file {path} is corrupt: {reason}")]
    DataCorruption { path: PathBuf, reason: String },

    #[error("alignment cancelled")]
    Cancelled,
}

impl AlignmentError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DataCorruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AlignmentError>;
