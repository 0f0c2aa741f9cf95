//! Event capture sink
//!
//! Runs once per tool-use event inside the host tool's execution path. It
//! must never fail or block that path: every error ends in a `warn!` and a
//! clean return.

use crate::config::Config;
use crate::registry::{send_signal, DaemonSignal, PidFileRegistry, ProcessRegistry};
use instinct_store::{ObservationStore, StorePaths};
use instinct_types::{EventKind, Observation, Phase, ToolUseNotification};
use std::io::Read;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a single capture did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The `disabled` marker is present; nothing was touched
    Disabled,
    /// No input arrived (or the read timed out)
    Empty,
    /// One record of this kind was appended
    Recorded(EventKind),
    /// The append failed and was logged
    Failed,
}

pub struct CaptureSink {
    paths: StorePaths,
    config: Config,
}

impl CaptureSink {
    pub fn new(paths: StorePaths, config: Config) -> Self {
        Self { paths, config }
    }

    /// Turn `input` into at most one observation in the store
    pub fn capture(&self, phase: Phase, input: &str) -> CaptureOutcome {
        if self.paths.is_disabled() {
            return CaptureOutcome::Disabled;
        }
        if input.trim().is_empty() {
            return CaptureOutcome::Empty;
        }

        let store = &self.config.store;
        let observation = match serde_json::from_str::<ToolUseNotification>(input) {
            Ok(notification) => {
                Observation::from_notification(phase, notification, store.max_field_chars)
            }
            Err(e) => {
                debug!("Malformed {} notification: {}", phase, e);
                Observation::parse_error(input, store.max_raw_chars)
            }
        };

        let log = ObservationStore::new(&self.paths, store.max_bytes());
        if let Err(e) = log.append(&observation) {
            warn!("Failed to record observation: {:#}", e);
            return CaptureOutcome::Failed;
        }

        if self.config.capture.notify_daemon {
            self.notify_daemon();
        }
        CaptureOutcome::Recorded(observation.event)
    }

    /// Best-effort trigger to a live daemon
    fn notify_daemon(&self) {
        let registry = PidFileRegistry::new(self.paths.pid_file());
        match registry.live_pid() {
            Ok(Some(pid)) => {
                if let Err(e) = send_signal(pid, DaemonSignal::Trigger) {
                    debug!("Could not notify daemon {}: {}", pid, e);
                }
            }
            Ok(None) => debug!("No daemon to notify"),
            Err(e) => debug!("Could not read registration: {}", e),
        }
    }
}

/// Read all of stdin, giving up after `timeout`.
///
/// The reader thread is detached; if stdin stays blocked it is abandoned and
/// dies with the process.
pub fn read_stdin(timeout: Duration) -> String {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = String::new();
        let result = std::io::stdin().read_to_string(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(input)) => input,
        Ok(Err(e)) => {
            warn!("Failed to read stdin: {}", e);
            String::new()
        }
        Err(_) => {
            warn!("Timed out after {:?} waiting for stdin", timeout);
            String::new()
        }
    }
}

/// `instinct observe <phase>`: check the off switch, read stdin, record
pub fn run_observe(paths: StorePaths, phase: Phase) -> CaptureOutcome {
    // Before config, stdin or any other I/O
    if paths.is_disabled() {
        return CaptureOutcome::Disabled;
    }

    let config = Config::load(&paths).unwrap_or_else(|e| {
        warn!("Using default config: {:#}", e);
        Config::default()
    });

    let input = read_stdin(config.capture.read_timeout());
    CaptureSink::new(paths, config).capture(phase, &input)
}
