//! Daemon lifecycle: start, stop, status and trigger
//!
//! The controller never runs the analysis loop itself. It launches a detached
//! `instinct daemon run` child and talks to it only through the registration
//! and signals.

use crate::registry::{send_signal, DaemonSignal, ProcessRegistry};
use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a freshly launched daemon process
pub trait SpawnedProcess: Send {
    fn id(&self) -> u32;

    /// Exit description once the process has terminated
    fn exit_status(&mut self) -> Option<String>;
}

impl SpawnedProcess for Child {
    fn id(&self) -> u32 {
        Child::id(self)
    }

    fn exit_status(&mut self) -> Option<String> {
        match self.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({e})")),
        }
    }
}

/// How the controller creates and signals daemon processes
pub trait Launcher: Send + Sync {
    fn spawn(&self) -> Result<Box<dyn SpawnedProcess>>;

    fn signal(&self, pid: u32, signal: DaemonSignal) -> io::Result<()>;
}

/// Re-executes the current binary as `daemon run` in its own process group,
/// with output appended to the observer log.
pub struct DetachedLauncher {
    exe: PathBuf,
    root: PathBuf,
    log_file: PathBuf,
}

impl DetachedLauncher {
    pub fn new(root: impl Into<PathBuf>, log_file: impl Into<PathBuf>) -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate the instinct executable")?;
        Ok(Self {
            exe,
            root: root.into(),
            log_file: log_file.into(),
        })
    }
}

impl Launcher for DetachedLauncher {
    fn spawn(&self) -> Result<Box<dyn SpawnedProcess>> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open {}", self.log_file.display()))?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.exe);
        cmd.arg("--root")
            .arg(&self.root)
            .args(["daemon", "run"])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: terminal hangups and Ctrl-C of the caller never reach it
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.exe.display()))?;
        debug!("Launched observer child pid {}", child.id());
        Ok(Box::new(child))
    }

    fn signal(&self, pid: u32, signal: DaemonSignal) -> io::Result<()> {
        send_signal(pid, signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    NotRunning,
    /// Terminate was delivered; the daemon exits once its current analysis ends
    Stopping { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: u32 },
    NotRunning,
}

pub struct DaemonController {
    registry: Arc<dyn ProcessRegistry>,
    launcher: Arc<dyn Launcher>,
    start_confirm: Duration,
    stop_timeout: Duration,
}

impl DaemonController {
    pub fn new(registry: Arc<dyn ProcessRegistry>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            registry,
            launcher,
            start_confirm: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_start_confirm(mut self, window: Duration) -> Self {
        self.start_confirm = window;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Launch the daemon unless one is already alive.
    ///
    /// Success means the child registered itself within the confirmation
    /// window. A child that exits or never registers is reported as an error.
    pub async fn start(&self) -> Result<StartOutcome> {
        if let Some(pid) = self.registry.live_pid()? {
            info!("Observer already running (pid {})", pid);
            return Ok(StartOutcome::AlreadyRunning { pid });
        }

        let mut child = self.launcher.spawn()?;
        let child_pid = child.id();
        let deadline = Instant::now() + self.start_confirm;

        loop {
            if let Some(pid) = self.registry.live_pid()? {
                if pid == child_pid {
                    info!("Observer started (pid {})", pid);
                    return Ok(StartOutcome::Started { pid });
                }
                // Another start won the race; our child exits on its own
                warn!("Observer pid {} registered first, child {} will exit", pid, child_pid);
                return Ok(StartOutcome::AlreadyRunning { pid });
            }

            if let Some(status) = child.exit_status() {
                bail!("Observer exited during startup ({status})");
            }

            if Instant::now() >= deadline {
                if let Err(e) = self.launcher.signal(child_pid, DaemonSignal::Terminate) {
                    warn!("Failed to terminate unregistered child {}: {}", child_pid, e);
                }
                bail!(
                    "Observer (pid {}) did not register within {:?}",
                    child_pid,
                    self.start_confirm
                );
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Ask a live daemon to shut down gracefully and wait for it to deregister.
    ///
    /// Shutdown is deferred while an analysis runs, so a daemon still
    /// registered after the timeout is reported as stopping, not as a failure.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let Some(pid) = self.registry.live_pid()? else {
            return Ok(StopOutcome::NotRunning);
        };

        if let Err(e) = self.launcher.signal(pid, DaemonSignal::Terminate) {
            if e.raw_os_error() == Some(nix::errno::Errno::ESRCH as i32) {
                // Exited between the liveness check and the signal
                self.registry.live_pid()?;
                return Ok(StopOutcome::Stopped { pid });
            }
            return Err(e).with_context(|| format!("Failed to signal observer pid {pid}"));
        }
        info!("Sent terminate to observer pid {}", pid);

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            if self.registry.live_pid()?.is_none() {
                return Ok(StopOutcome::Stopped { pid });
            }
            if Instant::now() >= deadline {
                info!(
                    "Observer pid {} still busy after {:?}, exits when analysis ends",
                    pid, self.stop_timeout
                );
                return Ok(StopOutcome::Stopping { pid });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Report liveness, clearing a stale registration on the way
    pub fn status(&self) -> Result<DaemonStatus> {
        Ok(match self.registry.live_pid()? {
            Some(pid) => DaemonStatus::Running { pid },
            None => DaemonStatus::NotRunning,
        })
    }

    /// Ask a live daemon to analyze now. Returns the pid signalled, if any.
    pub fn trigger(&self) -> Result<Option<u32>> {
        let Some(pid) = self.registry.live_pid()? else {
            return Ok(None);
        };
        self.launcher
            .signal(pid, DaemonSignal::Trigger)
            .with_context(|| format!("Failed to signal observer pid {pid}"))?;
        debug!("Sent trigger to observer pid {}", pid);
        Ok(Some(pid))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::fake::FakeRegistry;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum ChildScript {
        /// Registers itself and keeps running
        Healthy,
        /// Exits before registering
        Crashes,
        /// Keeps running but never registers
        Hangs,
        /// Stays registered after terminate, like a daemon mid-analysis
        Stubborn,
    }

    struct FakeChild {
        pid: u32,
        exited: bool,
    }

    impl SpawnedProcess for FakeChild {
        fn id(&self) -> u32 {
            self.pid
        }

        fn exit_status(&mut self) -> Option<String> {
            self.exited.then(|| "exit status: 1".to_string())
        }
    }

    struct FakeLauncher {
        registry: Arc<FakeRegistry>,
        script: ChildScript,
        next_pid: AtomicU32,
        spawned: AtomicU32,
        signals: Mutex<Vec<(u32, DaemonSignal)>>,
    }

    impl FakeLauncher {
        fn new(registry: Arc<FakeRegistry>, script: ChildScript) -> Self {
            Self {
                registry,
                script,
                next_pid: AtomicU32::new(4000),
                spawned: AtomicU32::new(0),
                signals: Mutex::new(Vec::new()),
            }
        }
    }

    impl Launcher for FakeLauncher {
        fn spawn(&self) -> Result<Box<dyn SpawnedProcess>> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let exited = self.script == ChildScript::Crashes;
            if !exited {
                self.registry.set_alive(pid, true);
            }
            if matches!(self.script, ChildScript::Healthy | ChildScript::Stubborn) {
                self.registry.register(pid)?;
            }
            Ok(Box::new(FakeChild { pid, exited }))
        }

        fn signal(&self, pid: u32, signal: DaemonSignal) -> io::Result<()> {
            self.signals.lock().unwrap().push((pid, signal));
            if signal == DaemonSignal::Terminate && self.script != ChildScript::Stubborn {
                self.registry.unregister(pid).map_err(io::Error::other)?;
                self.registry.set_alive(pid, false);
            }
            Ok(())
        }
    }

    fn controller(script: ChildScript) -> (Arc<FakeRegistry>, Arc<FakeLauncher>, DaemonController) {
        let registry = Arc::new(FakeRegistry::default());
        let launcher = Arc::new(FakeLauncher::new(Arc::clone(&registry), script));
        let controller = DaemonController::new(registry.clone(), launcher.clone())
            .with_start_confirm(Duration::from_secs(1))
            .with_stop_timeout(Duration::from_secs(1));
        (registry, launcher, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_one_daemon() {
        let (registry, launcher, controller) = controller(ChildScript::Healthy);

        let first = controller.start().await.unwrap();
        let StartOutcome::Started { pid } = first else {
            panic!("expected Started, got {first:?}");
        };
        let second = controller.start().await.unwrap();

        assert_eq!(second, StartOutcome::AlreadyRunning { pid });
        assert_eq!(launcher.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(registry.current(), Some(pid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_crashed_child() {
        let (registry, _launcher, controller) = controller(ChildScript::Crashes);

        let err = controller.start().await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
        assert_eq!(registry.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_child_that_never_registers() {
        let (_registry, launcher, controller) = controller(ChildScript::Hangs);

        let err = controller.start().await.unwrap_err();
        assert!(err.to_string().contains("did not register"));
        // The orphan is told to exit rather than left running unregistered
        assert_eq!(
            *launcher.signals.lock().unwrap(),
            vec![(4000, DaemonSignal::Terminate)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_status() {
        let (registry, launcher, controller) = controller(ChildScript::Healthy);
        let StartOutcome::Started { pid } = controller.start().await.unwrap() else {
            panic!("expected Started");
        };

        assert_eq!(controller.stop().await.unwrap(), StopOutcome::Stopped { pid });
        assert_eq!(controller.status().unwrap(), DaemonStatus::NotRunning);
        assert_eq!(registry.current(), None);
        assert_eq!(
            *launcher.signals.lock().unwrap(),
            vec![(pid, DaemonSignal::Terminate)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_absent_is_noop() {
        let (_registry, launcher, controller) = controller(ChildScript::Healthy);

        assert_eq!(controller.stop().await.unwrap(), StopOutcome::NotRunning);
        assert!(launcher.signals.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_busy_daemon_reports_stopping() {
        let (registry, _launcher, controller) = controller(ChildScript::Stubborn);
        let StartOutcome::Started { pid } = controller.start().await.unwrap() else {
            panic!("expected Started");
        };

        assert_eq!(controller.stop().await.unwrap(), StopOutcome::Stopping { pid });
        assert_eq!(registry.current(), Some(pid));
    }

    #[test]
    fn test_status_heals_stale_registration() {
        let (registry, _launcher, controller) = controller(ChildScript::Healthy);
        *registry.registered.lock().unwrap() = Some(999);

        assert_eq!(controller.status().unwrap(), DaemonStatus::NotRunning);
        assert_eq!(registry.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_signals_live_daemon() {
        let (_registry, launcher, controller) = controller(ChildScript::Healthy);
        assert_eq!(controller.trigger().unwrap(), None);

        let StartOutcome::Started { pid } = controller.start().await.unwrap() else {
            panic!("expected Started");
        };
        assert_eq!(controller.trigger().unwrap(), Some(pid));
        assert_eq!(
            *launcher.signals.lock().unwrap(),
            vec![(pid, DaemonSignal::Trigger)]
        );
    }
}
