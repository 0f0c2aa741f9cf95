use crate::capture::{run_observe, CaptureOutcome};
use crate::config::Config;
use crate::controller::{
    DaemonController, DaemonStatus, DetachedLauncher, StartOutcome, StopOutcome,
};
use crate::registry::PidFileRegistry;
use crate::service::ObserverService;
use anyhow::Result;
use clap::{Parser, Subcommand};
use instinct_store::{InstinctStore, ObservationStore, StorePaths};
use instinct_types::Phase;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "instinct")]
#[command(about = "Capture tool-use observations and distill them into instincts")]
#[command(version)]
pub struct Cli {
    /// Config root directory
    #[arg(long, global = true, env = "INSTINCT_HOME")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record one tool-use notification read from stdin
    Observe {
        /// Hook phase: pre or post
        phase: Phase,
    },
    /// Manage the background observer
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Show observer state and store statistics
    Status,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum DaemonAction {
    /// Start the observer in the background
    Start,
    /// Stop a running observer
    Stop,
    /// Exit 0 if the observer is running
    Status,
    /// Ask the running observer to analyze now
    Trigger,
    /// Run the observer loop in the foreground
    Run,
}

impl Cli {
    fn paths(&self) -> Result<StorePaths> {
        match &self.root {
            Some(root) => Ok(StorePaths::new(root)),
            None => StorePaths::from_env(),
        }
    }

    pub async fn run(self) -> Result<ExitCode> {
        let paths = self.paths();

        match self.command {
            Commands::Observe { phase } => {
                // The host tool only ever sees warnings
                let _ = instinct_logging::init_logging("warn");
                match paths {
                    Ok(paths) => match run_observe(paths, phase) {
                        CaptureOutcome::Recorded(event) => debug!("Recorded {:?}", event),
                        other => debug!("Capture outcome: {:?}", other),
                    },
                    Err(e) => warn!("Capture skipped: {:#}", e),
                }
                // Capture never fails its caller
                Ok(ExitCode::SUCCESS)
            }
            Commands::Daemon { action } => run_daemon(paths?, action).await,
            Commands::Status => print_status(paths?),
        }
    }
}

fn load_config(paths: &StorePaths) -> Result<Config> {
    let config = Config::load_with_dotenv(paths)?;
    let _ = instinct_logging::init_logging(&config.logging.level);
    Ok(config)
}

fn controller(paths: &StorePaths, config: &Config) -> Result<DaemonController> {
    let registry = Arc::new(PidFileRegistry::new(paths.pid_file()));
    let launcher = Arc::new(DetachedLauncher::new(paths.root(), paths.log_file())?);
    Ok(DaemonController::new(registry, launcher)
        .with_start_confirm(config.observer.start_confirm())
        .with_stop_timeout(config.observer.stop_timeout()))
}

async fn run_foreground(paths: StorePaths) -> Result<ExitCode> {
    let config = Config::load_with_dotenv(&paths)?;
    instinct_logging::init_daemon_logging(&config.logging.level)?;
    ObserverService::new(config, paths).run().await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_daemon(paths: StorePaths, action: DaemonAction) -> Result<ExitCode> {
    match action {
        DaemonAction::Run => run_foreground(paths).await,
        DaemonAction::Start => {
            Config::ensure_default(&paths)?;
            let config = load_config(&paths)?;
            match controller(&paths, &config)?.start().await? {
                StartOutcome::Started { pid } => println!("Observer started (pid {pid})"),
                StartOutcome::AlreadyRunning { pid } => {
                    println!("Observer already running (pid {pid})");
                }
            }
            println!("Log: {}", paths.log_file().display());
            Ok(ExitCode::SUCCESS)
        }
        DaemonAction::Stop => {
            let config = load_config(&paths)?;
            match controller(&paths, &config)?.stop().await? {
                StopOutcome::Stopped { pid } => println!("Observer stopped (pid {pid})"),
                StopOutcome::NotRunning => println!("Observer not running"),
                StopOutcome::Stopping { pid } => {
                    println!("Observer (pid {pid}) stopping, analysis in progress");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        DaemonAction::Status => {
            let config = load_config(&paths)?;
            Ok(report_daemon(&controller(&paths, &config)?.status()?))
        }
        DaemonAction::Trigger => {
            let config = load_config(&paths)?;
            match controller(&paths, &config)?.trigger()? {
                Some(pid) => {
                    println!("Triggered analysis (pid {pid})");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("Observer not running");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn report_daemon(status: &DaemonStatus) -> ExitCode {
    match status {
        DaemonStatus::Running { pid } => {
            println!("Observer running (pid {pid})");
            ExitCode::SUCCESS
        }
        DaemonStatus::NotRunning => {
            println!("Observer not running");
            ExitCode::FAILURE
        }
    }
}

fn print_status(paths: StorePaths) -> Result<ExitCode> {
    let config = load_config(&paths)?;
    let controller = controller(&paths, &config)?;
    let code = report_daemon(&controller.status()?);

    let store = ObservationStore::new(&paths, config.store.max_bytes());
    let instincts = InstinctStore::new(paths.instincts_dir());
    println!("Root: {}", paths.root().display());
    println!(
        "Observations: {} record(s), {} bytes",
        store.line_count()?,
        store.size()?
    );
    println!("Archives: {}", store.archives()?.len());
    println!("Instincts: {}", instincts.count()?);
    if paths.is_disabled() {
        println!("Capture: disabled");
    }

    Ok(code)
}
