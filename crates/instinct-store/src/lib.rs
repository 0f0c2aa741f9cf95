//! Instinct Store - on-disk state of the learning pipeline
//!
//! - [`StorePaths`]: layout of the config root directory
//! - [`ObservationStore`]: append-only, size-bounded observation log with archive
//! - [`InstinctStore`]: directory of instinct files written by the analysis engine

pub mod instincts;
pub mod observations;
pub mod paths;

pub use instincts::{InstinctFile, InstinctIssue, InstinctStore, VerificationReport};
pub use observations::{ObservationStore, DEFAULT_MAX_FILE_SIZE};
pub use paths::StorePaths;
