use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize logging for interactive commands (stderr, coloured)
pub fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init()?;

    Ok(())
}

/// Initialize logging for the detached daemon loop.
///
/// Its stdout is redirected into the observer log file, so colour codes are
/// disabled and thread ids are kept to tell the signal task from the loop.
pub fn init_daemon_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()?;

    Ok(())
}
