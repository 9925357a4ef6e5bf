//! Raw updates input.
//!
//! Decodes raw updates files and extracts one structured record per
//! message-bearing envelope.

pub mod envelope;
pub mod normalizer;

pub use envelope::UpdatesFile;
pub use normalizer::{Normalized, RecordNormalizer, StructuredRecord};
