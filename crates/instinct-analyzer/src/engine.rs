//! Analysis engine abstraction
//!
//! [`Analyzer`] is the seam between the daemon and whatever mines the
//! observation log. [`CliAnalyzer`] shells out to an external CLI engine.

use crate::config::{AnalyzerConfig, EngineInvocation};
use crate::error::{AnalyzerError, Result};
use crate::prompt::build_prompt;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// Longest stderr tail kept in [`AnalyzerError::NonZeroExit`]
const STDERR_TAIL_CHARS: usize = 2000;

/// Something that reads an observation log and writes instinct files
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Analyze the log at `log_path`.
    ///
    /// # Errors
    /// Returns an error if the engine is missing, fails to start, or exits non-zero
    async fn analyze(&self, log_path: &Path) -> Result<()>;
}

/// Runs an external CLI engine as a bounded sub-process
#[derive(Debug, Clone)]
pub struct CliAnalyzer {
    invocation: EngineInvocation,
    model: String,
    max_turns: u32,
    instincts_dir: PathBuf,
}

impl CliAnalyzer {
    /// Create an analyzer writing instincts into `instincts_dir`
    ///
    /// # Errors
    /// Returns an error if the configured command is empty
    pub fn new(config: &AnalyzerConfig, instincts_dir: impl Into<PathBuf>) -> Result<Self> {
        let invocation = config.command.invocation();
        if invocation.program.trim().is_empty() {
            return Err(AnalyzerError::Config(
                "analyzer command must not be empty".to_string(),
            ));
        }

        Ok(Self {
            invocation,
            model: config.model.clone(),
            max_turns: config.max_turns,
            instincts_dir: instincts_dir.into(),
        })
    }

    /// Full argument list for one run
    fn args(&self, log_path: &Path) -> Vec<String> {
        let mut args = self.invocation.args.clone();
        args.extend([
            "--model".to_string(),
            self.model.clone(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
            "--print".to_string(),
            build_prompt(log_path, &self.instincts_dir),
        ]);
        args
    }
}

/// Last [`STDERR_TAIL_CHARS`] characters of `stderr`
fn stderr_tail(stderr: &str) -> &str {
    match STDERR_TAIL_CHARS
        .checked_sub(1)
        .and_then(|n| stderr.char_indices().rev().nth(n))
    {
        Some((start, _)) => &stderr[start..],
        None => stderr,
    }
}

#[async_trait]
impl Analyzer for CliAnalyzer {
    fn name(&self) -> &str {
        &self.invocation.program
    }

    async fn analyze(&self, log_path: &Path) -> Result<()> {
        let program = &self.invocation.program;
        debug!(
            "Running analysis engine '{}' on {} (max_turns={})",
            program,
            log_path.display(),
            self.max_turns
        );

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(self.args(log_path));
        for (key, value) in &self.invocation.env {
            cmd.env(key, value);
            // The config loader lowercases keys (ANTHROPIC_MODEL -> anthropic_model)
            let upper = key.to_uppercase();
            if upper != *key {
                cmd.env(upper, value);
            }
        }
        cmd.current_dir(&self.instincts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnalyzerError::EngineNotFound {
                    program: program.clone(),
                }
            } else {
                AnalyzerError::SpawnFailed {
                    program: program.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalyzerError::NonZeroExit {
                program: program.clone(),
                code: output.status.code(),
                stderr: stderr_tail(stderr.trim()).to_string(),
            });
        }

        info!(
            "Analysis engine '{}' finished ({} bytes of output)",
            program,
            output.stdout.len()
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::EngineCommand;

    fn analyzer(command: &str, dir: &Path) -> CliAnalyzer {
        let config = AnalyzerConfig {
            command: EngineCommand::Simple(command.into()),
            ..AnalyzerConfig::default()
        };
        CliAnalyzer::new(&config, dir).unwrap()
    }

    #[test]
    fn test_args_carry_constraints() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer("claude --verbose", dir.path());
        let args = analyzer.args(Path::new("/tmp/obs.jsonl"));

        assert_eq!(args[0], "--verbose");
        assert_eq!(&args[1..5], ["--model", "haiku", "--max-turns", "3"]);
        assert_eq!(args[5], "--print");
        assert!(args[6].contains("/tmp/obs.jsonl"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let config = AnalyzerConfig {
            command: EngineCommand::Simple("   ".into()),
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            CliAnalyzer::new(&config, "/tmp"),
            Err(AnalyzerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_engine_reported() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer("instinct-engine-that-does-not-exist", dir.path());
        let err = analyzer.analyze(Path::new("/tmp/obs.jsonl")).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::EngineNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_reported() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer("false", dir.path());
        let err = analyzer.analyze(Path::new("/tmp/obs.jsonl")).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::NonZeroExit { code: Some(1), .. }));
    }

    #[test]
    fn test_stderr_tail_counts_characters() {
        let short = "é".repeat(10);
        assert_eq!(stderr_tail(&short), short);

        let long = format!("{}{}", "a".repeat(500), "é".repeat(STDERR_TAIL_CHARS));
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.chars().all(|c| c == 'é'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_long_stderr_is_cut_to_tail() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalyzerConfig {
            command: EngineCommand::Advanced {
                command: "sh".into(),
                args: vec![
                    "-c".into(),
                    "i=0; while [ $i -lt 2500 ]; do printf 'é' >&2; i=$((i+1)); done; exit 3".into(),
                ],
                env: std::collections::HashMap::new(),
            },
            ..AnalyzerConfig::default()
        };
        let analyzer = CliAnalyzer::new(&config, dir.path()).unwrap();

        let err = analyzer.analyze(Path::new("/tmp/obs.jsonl")).await.unwrap_err();
        let AnalyzerError::NonZeroExit { code, stderr, .. } = err else {
            panic!("expected NonZeroExit, got {err:?}");
        };
        assert_eq!(code, Some(3));
        assert_eq!(stderr.chars().count(), STDERR_TAIL_CHARS);
        assert!(stderr.chars().all(|c| c == 'é'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer("true", dir.path());
        assert!(analyzer.analyze(Path::new("/tmp/obs.jsonl")).await.is_ok());
    }
}
