//! `Instinct` Analyzer Library
//!
//! Runs the external pattern-mining engine over the observation log.
//!
//! ## Features
//!
//! - [`Analyzer`] trait with a CLI-backed default implementation
//! - [`PatternExtractor`]: threshold check, engine call, unconditional archival
//! - Engine failures are logged and absorbed, never propagated to the daemon loop
//! - Zero unsafe code

#![deny(unsafe_code, dead_code, unused_imports, unused_variables, missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod prompt;

pub use config::{AnalyzerConfig, EngineCommand, EngineInvocation};
pub use engine::{Analyzer, CliAnalyzer};
pub use error::AnalyzerError;
pub use extractor::{AnalysisOutcome, PatternExtractor, DEFAULT_MIN_OBSERVATIONS};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockAnalyzer, MockBehavior};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{AnalysisOutcome, Analyzer, AnalyzerConfig, AnalyzerError, PatternExtractor};
}
