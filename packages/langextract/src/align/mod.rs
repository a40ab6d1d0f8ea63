//! Text alignment engine.
//!
//! Takes text produced by a model and finds where it sits in the source
//! document. Strategies run from strictest to loosest:
//!
//! 1. Exact substring (quality 100)
//! 2. Normalized substring: case folding, whitespace collapsing, punctuation
//!    stripping, applied cumulatively (85, 70, 55)
//! 3. Approximate: best edit-distance window (quality scales with distance)
//!
//! Offsets are byte offsets into the original text; every normalized match
//! is mapped back through the normalization.

mod aligner;
mod approximate;
mod normalize;

pub use aligner::{
    align_extraction, align_extractions, find_best_alignment, validate_alignment, TextAligner,
};
