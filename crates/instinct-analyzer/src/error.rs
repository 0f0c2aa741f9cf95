//! Error types for analysis engine invocations

use thiserror::Error;

/// Analysis engine errors
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Engine executable is not installed or not on `PATH`
    #[error("Analysis engine '{program}' not found")]
    EngineNotFound {
        /// Program that was looked up
        program: String,
    },

    /// Engine could not be started for another reason
    #[error("Failed to spawn analysis engine '{program}': {reason}")]
    SpawnFailed {
        /// Program that failed to start
        program: String,
        /// Failure reason
        reason: String,
    },

    /// Engine ran but reported failure
    #[error("Analysis engine '{program}' exited with {}", describe_exit(.code))]
    NonZeroExit {
        /// Program that failed
        program: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Tail of the engine's stderr
        stderr: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, AnalyzerError>;
