//! Pattern extraction step run by the daemon

use crate::engine::Analyzer;
use crate::error::AnalyzerError;
use instinct_store::{InstinctStore, ObservationStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Fewest unprocessed records worth an analysis run
pub const DEFAULT_MIN_OBSERVATIONS: usize = 10;

/// What one [`PatternExtractor::analyze`] call did
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Too few records; nothing was touched
    Skipped {
        /// Records currently in the active log
        pending: usize,
    },
    /// Engine succeeded and the batch was archived
    Completed {
        /// Records handed to the engine
        records: usize,
        /// Archive segment holding the batch
        archive: Option<PathBuf>,
    },
    /// Engine failed or was missing; the batch was archived anyway
    EngineFailed {
        /// Records handed to the engine
        records: usize,
        /// Archive segment holding the batch
        archive: Option<PathBuf>,
        /// Rendered engine error
        error: String,
    },
}

/// Invokes the analyzer over the active log and archives what it consumed
pub struct PatternExtractor {
    store: ObservationStore,
    instincts: InstinctStore,
    analyzer: Arc<dyn Analyzer>,
    min_observations: usize,
}

impl PatternExtractor {
    /// Create an extractor with the default record threshold
    #[must_use]
    pub fn new(store: ObservationStore, instincts: InstinctStore, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            store,
            instincts,
            analyzer,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
        }
    }

    /// Override the record threshold
    #[must_use]
    pub fn with_min_observations(mut self, min_observations: usize) -> Self {
        self.min_observations = min_observations;
        self
    }

    /// Observation store this extractor consumes
    #[must_use]
    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// Run one analysis step.
    ///
    /// Below the threshold this is a no-op. Otherwise the engine is invoked
    /// once and, whatever its result, the active log is archived. Engine
    /// failures are reported in the outcome, not as an error.
    ///
    /// # Errors
    /// Returns an error only if the store itself cannot be read or rotated
    pub async fn analyze(&self) -> anyhow::Result<AnalysisOutcome> {
        let pending = self.store.line_count()?;
        if pending < self.min_observations {
            debug!(
                "Skipping analysis: {} observation(s), need {}",
                pending, self.min_observations
            );
            return Ok(AnalysisOutcome::Skipped { pending });
        }

        info!(
            "Analyzing {} observations with '{}'",
            pending,
            self.analyzer.name()
        );

        let result = match self.instincts.ensure_dir() {
            Ok(()) => self
                .analyzer
                .analyze(self.store.log_path())
                .await
                .map_err(|e| {
                    match &e {
                        AnalyzerError::EngineNotFound { program } => {
                            warn!("Analysis engine '{}' not found, skipping this batch", program);
                        }
                        other => error!("Analysis failed: {}", other),
                    }
                    e.to_string()
                }),
            Err(e) => {
                error!("Cannot prepare instinct directory: {:#}", e);
                Err(format!("{e:#}"))
            }
        };

        let archive = self.store.rotate()?;

        match result {
            Ok(()) => {
                if let Err(e) = self.instincts.verify() {
                    warn!("Failed to verify instinct files: {:#}", e);
                }
                Ok(AnalysisOutcome::Completed {
                    records: pending,
                    archive,
                })
            }
            Err(error) => Ok(AnalysisOutcome::EngineFailed {
                records: pending,
                archive,
                error,
            }),
        }
    }
}
