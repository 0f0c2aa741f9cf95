//! Analysis scheduling inside the daemon loop
//!
//! Each cycle waits on a timer that an external trigger can cut short. A
//! trigger runs analysis immediately and marks the cycle as handled, so the
//! scheduled run at the end of that same cycle is skipped and one batch of
//! observations is never analyzed twice back to back.

use instinct_analyzer::{AnalysisOutcome, PatternExtractor};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Timer,
    Trigger,
}

/// Counters reported when the loop exits
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub analyses: u64,
    pub suppressed: u64,
}

pub struct Scheduler {
    extractor: PatternExtractor,
    period: Duration,
}

impl Scheduler {
    pub fn new(extractor: PatternExtractor, period: Duration) -> Self {
        Self { extractor, period }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed while waiting; an analysis in progress
    /// always finishes first.
    pub async fn run(
        &self,
        mut triggers: mpsc::Receiver<()>,
        shutdown: CancellationToken,
    ) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut handled_this_cycle = false;

        info!("Scheduler running every {:?}", self.period);

        loop {
            let timer = tokio::time::sleep(self.period);
            tokio::pin!(timer);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Shutdown while waiting, timer cancelled");
                    break;
                }
                Some(()) = triggers.recv() => {
                    self.step(Wake::Trigger, &mut stats).await;
                    handled_this_cycle = true;
                }
                _ = &mut timer => {}
            }

            // End of cycle: the scheduled run, unless a trigger already covered it
            if std::mem::take(&mut handled_this_cycle) {
                debug!("Scheduled analysis suppressed, trigger already ran this cycle");
                stats.suppressed += 1;
            } else {
                self.step(Wake::Timer, &mut stats).await;
            }
            stats.cycles += 1;
        }

        info!(
            "Scheduler stopped after {} cycle(s), {} analysis run(s)",
            stats.cycles, stats.analyses
        );
        stats
    }

    async fn step(&self, wake: Wake, stats: &mut SchedulerStats) {
        debug!("Analyzing ({:?})", wake);
        stats.analyses += 1;

        match self.extractor.analyze().await {
            Ok(AnalysisOutcome::Skipped { pending }) => {
                debug!("Nothing to analyze ({} pending)", pending);
            }
            Ok(AnalysisOutcome::Completed { records, archive }) => {
                info!(
                    "Analysis complete: {} record(s) archived to {:?}",
                    records, archive
                );
            }
            Ok(AnalysisOutcome::EngineFailed { records, archive, error }) => {
                warn!(
                    "Analysis did not complete ({}); {} record(s) archived to {:?} without retry",
                    error, records, archive
                );
            }
            Err(e) => error!("Analysis step failed: {:#}", e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use instinct_analyzer::MockAnalyzer;
    use instinct_store::{InstinctStore, ObservationStore, StorePaths, DEFAULT_MAX_FILE_SIZE};
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    const PERIOD: Duration = Duration::from_secs(300);

    struct Harness {
        _dir: tempfile::TempDir,
        mock: MockAnalyzer,
        triggers: mpsc::Sender<()>,
        shutdown: CancellationToken,
        handle: JoinHandle<SchedulerStats>,
    }

    /// Threshold 0 so every step reaches the analyzer and can be counted
    fn spawn(mock: MockAnalyzer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let extractor = PatternExtractor::new(
            ObservationStore::new(&paths, DEFAULT_MAX_FILE_SIZE),
            InstinctStore::new(paths.instincts_dir()),
            Arc::new(mock.clone()),
        )
        .with_min_observations(0);

        let scheduler = Scheduler::new(extractor, PERIOD);
        let (triggers, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { scheduler.run(rx, token).await });

        Harness {
            _dir: dir,
            mock,
            triggers,
            shutdown,
            handle,
        }
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_each_period() {
        let h = spawn(MockAnalyzer::new());

        advance(299).await;
        assert_eq!(h.mock.calls(), 0);
        advance(2).await;
        assert_eq!(h.mock.calls(), 1);
        advance(300).await;
        assert_eq!(h.mock.calls(), 2);

        h.shutdown.cancel();
        let stats = h.handle.await.unwrap();
        assert_eq!(stats.analyses, 2);
        assert_eq!(stats.suppressed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_now_and_suppresses_scheduled_run() {
        let h = spawn(MockAnalyzer::new());

        advance(100).await;
        h.triggers.send(()).await.unwrap();
        advance(1).await;
        assert_eq!(h.mock.calls(), 1);

        // The cycle the trigger interrupted would have ended at 300
        advance(200).await;
        assert_eq!(h.mock.calls(), 1);

        // A fresh full period starts after the trigger
        advance(300).await;
        assert_eq!(h.mock.calls(), 2);

        h.shutdown.cancel();
        let stats = h.handle.await.unwrap();
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.analyses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_skips_analysis() {
        let h = spawn(MockAnalyzer::new());

        advance(10).await;
        h.shutdown.cancel();
        let stats = h.handle.await.unwrap();

        assert_eq!(h.mock.calls(), 0);
        assert_eq!(stats.analyses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_analysis_is_deferred() {
        let h = spawn(MockAnalyzer::new().with_delay(Duration::from_secs(30)));

        h.triggers.send(()).await.unwrap();
        advance(1).await;
        assert_eq!(h.mock.seen().len(), 1);
        assert_eq!(h.mock.calls(), 0);

        h.shutdown.cancel();
        let stats = h.handle.await.unwrap();

        assert_eq!(h.mock.calls(), 1);
        assert_eq!(stats.analyses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_trigger_channel_keeps_timer() {
        let h = spawn(MockAnalyzer::new());
        drop(h.triggers);

        advance(301).await;
        assert_eq!(h.mock.calls(), 1);

        h.shutdown.cancel();
        h.handle.await.unwrap();
    }
}
