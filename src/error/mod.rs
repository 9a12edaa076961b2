//! Error normalization and classification
//!
//! This module turns raw failures into comparable signatures and assigns each
//! one a domain category and severity. It has no state of its own; the
//! registry and recovery modules build on its output.

pub mod classification;
pub mod detector;
pub mod signature;

// Re-export main types for convenient access
pub use classification::{Category, Classification, Severity};
pub use detector::{ClassificationPattern, ErrorClassifier, MatchTarget};
pub use signature::{SignatureNormalizer, DEFAULT_MAX_SIGNATURE_LENGTH};
