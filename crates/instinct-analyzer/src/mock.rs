//! In-memory analyzer for tests

use crate::engine::Analyzer;
use crate::error::{AnalyzerError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behaviour of a [`MockAnalyzer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Return `Ok(())`
    Succeed,
    /// Behave like a missing executable
    EngineMissing,
    /// Behave like a failing engine
    Fail,
}

/// Analyzer that records each call instead of running an engine
#[derive(Debug, Clone)]
pub struct MockAnalyzer {
    behavior: MockBehavior,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(PathBuf, usize)>>>,
}

impl MockAnalyzer {
    /// Analyzer that always succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    /// Analyzer with the given scripted outcome
    #[must_use]
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep for `delay` inside every call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completed calls
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Log path and its record count as seen by each call
    #[must_use]
    pub fn seen(&self) -> Vec<(PathBuf, usize)> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn analyze(&self, log_path: &Path) -> Result<()> {
        let records = std::fs::read_to_string(log_path)
            .map(|content| content.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((log_path.to_path_buf(), records));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::EngineMissing => Err(AnalyzerError::EngineNotFound {
                program: "mock".to_string(),
            }),
            MockBehavior::Fail => Err(AnalyzerError::NonZeroExit {
                program: "mock".to_string(),
                code: Some(1),
                stderr: "scripted failure".to_string(),
            }),
        }
    }
}
