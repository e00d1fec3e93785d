//! Alignment core
//!
//! The DP engine, the anchor, special-segment handling, and the sequential
//! state machine that ties them together.

pub mod anchor;
pub mod dp;
pub mod matcher;
pub mod pipeline;
pub mod report;
pub mod special;
pub mod split;
pub mod types;

pub use special::{SpecialKind, TransitionKind};
pub use split::{ForcedAligner, WordTiming};
pub use types::{AlignmentOutcome, AlignmentReport, RunStats, SegmentOutput};
