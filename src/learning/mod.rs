//! Learning
//!
//! Extraction of memories from social items and the content rules every
//! memory must satisfy.

mod extractor;
pub mod sanitize;

pub use extractor::{fingerprint, parse_memories_response, ExtractorStats, LearningExtractor, LearningSource};
