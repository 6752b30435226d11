//! Spelling correction.
//!
//! Candidates for a misspelled word are the index terms sharing n-grams
//! with it; the ones with the largest overlap get an exact, banded edit
//! distance and those within the maximum distance are returned.

pub mod corrector;
pub mod levenshtein;
pub mod ngram;

pub use corrector::{Corrector, CorrectorConfig, Suggestion};
