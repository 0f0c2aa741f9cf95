//! Daemon registration (PID file) and OS process plumbing

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Observer already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Registration I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Signals the controller sends to a running daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Run analysis now (`SIGUSR1`)
    Trigger,
    /// Finish the current step and exit (`SIGTERM`)
    Terminate,
}

impl DaemonSignal {
    fn as_nix(self) -> Signal {
        match self {
            DaemonSignal::Trigger => Signal::SIGUSR1,
            DaemonSignal::Terminate => Signal::SIGTERM,
        }
    }
}

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
}

/// Whether a process with this pid exists
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // Exists, owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Deliver `signal` to `pid`
pub fn send_signal(pid: u32, signal: DaemonSignal) -> io::Result<()> {
    let pid = to_pid(pid)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;
    kill(pid, signal.as_nix()).map_err(io::Error::from)
}

/// "A daemon with this identity is alive", behind an injectable seam.
pub trait ProcessRegistry: Send + Sync {
    /// Record `pid` as the live daemon. Fails if another live daemon is registered.
    fn register(&self, pid: u32) -> Result<()>;

    /// Raw registered pid, alive or not
    fn registered_pid(&self) -> Result<Option<u32>>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Remove the registration if it still names `pid`
    fn unregister(&self, pid: u32) -> Result<()>;

    /// Registered pid if its process is running. A stale registration is deleted.
    fn live_pid(&self) -> Result<Option<u32>> {
        match self.registered_pid()? {
            Some(pid) if self.is_alive(pid) => Ok(Some(pid)),
            Some(pid) => {
                info!("Clearing stale registration for pid {}", pid);
                self.unregister(pid)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Registration backed by a PID file and the OS process table
#[derive(Debug, Clone)]
pub struct PidFileRegistry {
    path: PathBuf,
}

impl PidFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ProcessRegistry for PidFileRegistry {
    fn register(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }

        // Second pass runs after a stale registration was cleared
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", pid).map_err(|e| self.io_err(e))?;
                    debug!("Registered pid {} in {}", pid, self.path().display());
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match self.live_pid()? {
                    Some(existing) if existing == pid => return Ok(()),
                    Some(existing) => return Err(RegistryError::AlreadyRunning { pid: existing }),
                    None => continue,
                },
                Err(e) => return Err(self.io_err(e)),
            }
        }

        match self.live_pid()? {
            Some(existing) => Err(RegistryError::AlreadyRunning { pid: existing }),
            None => Err(self.io_err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "registration keeps changing underneath us",
            ))),
        }
    }

    fn registered_pid(&self) -> Result<Option<u32>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => match content.trim().parse::<u32>() {
                Ok(pid) => Ok(Some(pid)),
                Err(_) => {
                    // Garbage is as good as a dead pid; report 0 so it is cleared
                    debug!("Unparseable registration {:?}", content.trim());
                    Ok(Some(0))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        process_alive(pid)
    }

    fn unregister(&self, pid: u32) -> Result<()> {
        match self.registered_pid()? {
            Some(current) if current == pid => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_err(e)),
            },
            Some(current) => {
                debug!("Registration now names pid {}, leaving it", current);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Removes the registration for `pid` when dropped
pub struct RegistrationGuard<'a> {
    registry: &'a dyn ProcessRegistry,
    pid: u32,
}

impl<'a> RegistrationGuard<'a> {
    /// Register `pid` and return a guard that unregisters it on drop
    pub fn acquire(registry: &'a dyn ProcessRegistry, pid: u32) -> Result<Self> {
        registry.register(pid)?;
        Ok(Self { registry, pid })
    }
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.unregister(self.pid) {
            tracing::warn!("Failed to remove registration: {}", e);
        }
    }
}
