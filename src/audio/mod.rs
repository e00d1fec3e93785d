//! Audio processing module
//!
//! VAD interval cleaning and the phoneme ASR driver, plus the backend traits
//! the acoustic models sit behind.

pub mod asr;
pub mod types;
pub mod vad;

pub use asr::{collapse_ctc_tokens, run_asr, AsrBackend};
pub use types::*;
pub use vad::{clean_speech_intervals, VadBackend};
