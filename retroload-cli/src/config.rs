//! Configuration file support for retroload.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RETROLOAD_*)
//! 3. Local config file (./retroload.toml)
//! 4. Global config file (~/.config/retroload/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use retroload::{LoaderConfig, MonitorCommands};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serial port used when nothing else names one.
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Timing configuration, all in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Gap between command characters.
    pub char_delay_ms: Option<u64>,
    /// Gap between XMODEM packet bytes.
    pub packet_byte_delay_ms: Option<u64>,
    /// Wait for the receiver's initial NAK.
    pub ready_timeout_ms: Option<u64>,
    /// Wait for each packet acknowledgement.
    pub ack_timeout_ms: Option<u64>,
    /// Wait for the monitor prompt.
    pub prompt_timeout_ms: Option<u64>,
    /// How long to collect program output after running it.
    pub run_timeout_ms: Option<u64>,
}

/// Transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Attempts per packet.
    pub max_retries: Option<u32>,
    /// Accept a load whose final EOT was not acknowledged.
    pub tolerate_incomplete_finish: Option<bool>,
}

/// Monitor command words.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Begin XMODEM receive.
    pub load: Option<String>,
    /// Jump to address.
    pub run: Option<String>,
    /// Examine memory.
    pub examine: Option<String>,
    /// Deposit memory.
    pub deposit: Option<String>,
    /// Prompt marker.
    pub prompt: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Timeouts and pacing.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Retry behaviour.
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Monitor dialect.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("retroload.toml")) {
            debug!("Loaded local config from retroload.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "retroload").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields in `other` win.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.connection.port, other.connection.port);
        take(&mut self.connection.baud, other.connection.baud);

        take(&mut self.timing.char_delay_ms, other.timing.char_delay_ms);
        take(
            &mut self.timing.packet_byte_delay_ms,
            other.timing.packet_byte_delay_ms,
        );
        take(&mut self.timing.ready_timeout_ms, other.timing.ready_timeout_ms);
        take(&mut self.timing.ack_timeout_ms, other.timing.ack_timeout_ms);
        take(&mut self.timing.prompt_timeout_ms, other.timing.prompt_timeout_ms);
        take(&mut self.timing.run_timeout_ms, other.timing.run_timeout_ms);

        take(&mut self.transfer.max_retries, other.transfer.max_retries);
        take(
            &mut self.transfer.tolerate_incomplete_finish,
            other.transfer.tolerate_incomplete_finish,
        );

        take(&mut self.monitor.load, other.monitor.load);
        take(&mut self.monitor.run, other.monitor.run);
        take(&mut self.monitor.examine, other.monitor.examine);
        take(&mut self.monitor.deposit, other.monitor.deposit);
        take(&mut self.monitor.prompt, other.monitor.prompt);
    }

    /// Monitor command words, falling back to the stock monitor's.
    pub fn commands(&self) -> MonitorCommands {
        let defaults = MonitorCommands::default();
        let m = &self.monitor;
        MonitorCommands {
            load: m.load.clone().unwrap_or(defaults.load),
            run: m.run.clone().unwrap_or(defaults.run),
            examine: m.examine.clone().unwrap_or(defaults.examine),
            deposit: m.deposit.clone().unwrap_or(defaults.deposit),
            prompt: match m.prompt.as_deref() {
                Some("") => {
                    warn!("Ignoring empty [monitor] prompt, using {:?}", defaults.prompt);
                    defaults.prompt
                },
                Some(prompt) => prompt.to_string(),
                None => defaults.prompt,
            },
        }
    }

    /// Loader settings with configured values applied over the defaults.
    pub fn loader_config(&self) -> LoaderConfig {
        let mut loader = LoaderConfig::default();
        let ms = Duration::from_millis;
        let t = &self.timing;

        if let Some(v) = t.char_delay_ms {
            loader.session.char_delay = ms(v);
        }
        if let Some(v) = t.prompt_timeout_ms {
            loader.session.prompt_timeout = ms(v);
        }
        if let Some(v) = t.packet_byte_delay_ms {
            loader.transfer.byte_delay = ms(v);
        }
        if let Some(v) = t.ready_timeout_ms {
            loader.transfer.ready_timeout = ms(v);
        }
        if let Some(v) = t.ack_timeout_ms {
            loader.transfer.ack_timeout = ms(v);
        }
        if let Some(v) = t.run_timeout_ms {
            loader.run_timeout = ms(v);
        }
        if let Some(v) = self.transfer.max_retries {
            loader.transfer.max_retries = v;
        }
        if let Some(v) = self.transfer.tolerate_incomplete_finish {
            loader.tolerate_incomplete_finish = v;
        }
        loader.session.commands = self.commands();

        loader
    }
}
