pub mod ngram;
pub mod script;
pub mod store;
pub mod subcost;
pub mod types;

pub use ngram::NgramIndex;
pub use script::{QuranScript, VerseWordCounts};
pub use store::{Phonemizer, ReferenceDataPaths, ReferenceStore, RunVocab};
pub use subcost::SubCostTable;
pub use types::{ChapterRecord, ChapterReference, PhonemeId, PhonemeVocab, Word};
