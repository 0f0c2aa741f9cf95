use anyhow::Context;
use instinct_analyzer::AnalyzerConfig;
use instinct_store::StorePaths;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Default config template created by `daemon start` when no config exists
const DEFAULT_CONFIG: &str = r#"
[observer]
interval_secs = 300      # Period between scheduled analyses
min_observations = 10    # Skip analysis below this many records
start_confirm_ms = 2000  # How long `daemon start` waits for the loop to register
stop_timeout_ms = 5000   # How long `daemon stop` waits for the loop to exit

[store]
max_file_size_mb = 10    # Rotate the active log past this size
max_field_chars = 5000   # Truncate tool input/output beyond this
max_raw_chars = 2000     # Truncate unparseable input beyond this

[capture]
read_timeout_ms = 2000   # Give up on a blocked stdin after this
notify_daemon = false    # Send the trigger signal after every capture

[analyzer]
command = "claude"       # Or { command = "...", args = [...], env = { ... } }
model = "haiku"
max_turns = 3

[logging]
level = "info"  # trace, debug, info, warn, error
"#;

#[derive(Debug, Deserialize, Clone)]
pub struct ObserverConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    #[serde(default = "default_start_confirm_ms")]
    pub start_confirm_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_min_observations() -> usize {
    instinct_analyzer::DEFAULT_MIN_OBSERVATIONS
}

fn default_start_confirm_ms() -> u64 {
    2000
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            min_observations: default_min_observations(),
            start_confirm_ms: default_start_confirm_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl ObserverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn start_confirm(&self) -> Duration {
        Duration::from_millis(self.start_confirm_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_field_chars")]
    pub max_field_chars: usize,
    #[serde(default = "default_max_raw_chars")]
    pub max_raw_chars: usize,
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_max_field_chars() -> usize {
    5000
}

fn default_max_raw_chars() -> usize {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            max_field_chars: default_max_field_chars(),
            max_raw_chars: default_max_raw_chars(),
        }
    }
}

impl StoreConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub notify_daemon: bool,
}

fn default_read_timeout_ms() -> u64 {
    2000
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            notify_daemon: false,
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Ensure the config root and its config file exist, creating defaults if needed
    pub fn ensure_default(paths: &StorePaths) -> anyhow::Result<()> {
        let root = paths.root();
        if !root.exists() {
            fs::create_dir_all(root)
                .with_context(|| format!("Failed to create {}", root.display()))?;
            eprintln!("Created config directory: {}", root.display());
        }

        let config_path = paths.config_file();
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG.trim())?;
            eprintln!("Created default config: {}", config_path.display());
        }

        Ok(())
    }

    /// Load configuration with layered approach:
    /// 1. Built-in defaults
    /// 2. `<root>/config.toml` (optional)
    /// 3. Environment variables with `INSTINCT__` prefix (highest priority)
    pub fn load(paths: &StorePaths) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::File::from(paths.config_file())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("INSTINCT").separator("__"))
            .build()?;

        let config: Self = config.try_deserialize()?;
        Ok(config)
    }

    /// Load `.env` from the current directory, then the layered config
    pub fn load_with_dotenv(paths: &StorePaths) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::load(paths)
    }
}
