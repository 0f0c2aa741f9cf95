use crate::config::Config;
use crate::registry::{PidFileRegistry, RegistrationGuard};
use crate::scheduler::Scheduler;
use anyhow::Result;
use instinct_analyzer::{Analyzer, CliAnalyzer, PatternExtractor};
use instinct_store::{InstinctStore, ObservationStore, StorePaths};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Observer service - the long-lived daemon loop
pub struct ObserverService {
    config: Config,
    paths: StorePaths,
    analyzer: Option<Arc<dyn Analyzer>>,
}

impl ObserverService {
    /// Create a new observer service
    pub fn new(config: Config, paths: StorePaths) -> Self {
        Self {
            config,
            paths,
            analyzer: None,
        }
    }

    /// Replace the configured CLI engine
    #[cfg(test)]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    fn build_scheduler(&self) -> Result<Scheduler> {
        let store = ObservationStore::new(&self.paths, self.config.store.max_bytes());
        store.ensure_dirs()?;

        let instincts = InstinctStore::new(self.paths.instincts_dir());
        instincts.ensure_dir()?;

        let analyzer: Arc<dyn Analyzer> = match &self.analyzer {
            Some(analyzer) => Arc::clone(analyzer),
            None => Arc::new(CliAnalyzer::new(
                &self.config.analyzer,
                self.paths.instincts_dir(),
            )?),
        };

        let extractor = PatternExtractor::new(store, instincts, analyzer)
            .with_min_observations(self.config.observer.min_observations);
        Ok(Scheduler::new(extractor, self.config.observer.interval()))
    }

    /// Run the observer until a termination signal arrives
    pub async fn run(self) -> Result<()> {
        info!("Starting instinct observer (pid {})", std::process::id());
        info!(
            "Observer config: interval={}s, min_observations={}, root={}",
            self.config.observer.interval_secs,
            self.config.observer.min_observations,
            self.paths.root().display()
        );

        // Handlers go in before registration so no signal can hit the default action
        let handlers = SignalHandlers::install()?;

        let registry = PidFileRegistry::new(self.paths.pid_file());
        let _registration = RegistrationGuard::acquire(&registry, std::process::id())?;

        let scheduler = self.build_scheduler()?;

        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let signals = tokio::spawn(handlers.forward(trigger_tx, shutdown.clone()));

        let stats = scheduler.run(trigger_rx, shutdown.clone()).await;
        shutdown.cancel();
        if let Err(e) = signals.await {
            error!("Signal task failed: {}", e);
        }

        info!(
            "Observer stopped ({} analyses, {} suppressed)",
            stats.analyses, stats.suppressed
        );
        Ok(())
    }
}

/// SIGUSR1 → trigger, SIGTERM/SIGINT → shutdown, SIGHUP ignored
struct SignalHandlers {
    usr1: Signal,
    term: Signal,
    int: Signal,
    hup: Signal,
}

impl SignalHandlers {
    fn install() -> Result<Self> {
        Ok(Self {
            usr1: signal(SignalKind::user_defined1())?,
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    async fn forward(mut self, triggers: mpsc::Sender<()>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.usr1.recv() => {
                    info!("Received trigger signal");
                    // A pending trigger already covers this one
                    if triggers.try_send(()).is_err() {
                        debug!("Trigger already pending");
                    }
                }
                _ = self.term.recv() => {
                    info!("Received terminate signal");
                    shutdown.cancel();
                    break;
                }
                _ = self.int.recv() => {
                    info!("Received interrupt signal");
                    shutdown.cancel();
                    break;
                }
                _ = self.hup.recv() => {
                    debug!("Ignoring hangup");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::{send_signal, DaemonSignal, ProcessRegistry};
    use instinct_analyzer::MockAnalyzer;
    use instinct_types::Observation;
    use std::time::Duration;

    fn fill(paths: &StorePaths, n: usize) {
        let store = ObservationStore::new(paths, 10 * 1024 * 1024);
        for i in 0..n {
            store
                .append(&Observation::parse_error(&format!("raw {i}"), 2000))
                .unwrap();
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    // Sends real signals to the test process itself, so everything runs in one test
    #[tokio::test]
    async fn test_service_lifecycle_with_signals() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        let mock = MockAnalyzer::new();
        let service = ObserverService::new(Config::default(), paths.clone())
            .with_analyzer(Arc::new(mock.clone()));

        let handle = tokio::spawn(service.run());
        let registry = PidFileRegistry::new(paths.pid_file());
        let me = std::process::id();
        assert!(wait_until(|| registry.live_pid().ok().flatten() == Some(me)).await);

        fill(&paths, 10);
        send_signal(me, DaemonSignal::Trigger).unwrap();
        assert!(wait_until(|| mock.calls() == 1).await);

        let store = ObservationStore::new(&paths, 10 * 1024 * 1024);
        assert_eq!(store.line_count().unwrap(), 0);
        assert_eq!(store.archives().unwrap().len(), 1);

        send_signal(me, DaemonSignal::Terminate).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!paths.pid_file().exists());
    }
}
