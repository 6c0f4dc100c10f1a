//! Configuration
//!
//! Loads configuration from TOML file at `~/.config/area-rootless/config.toml`.
//! Auto-generates default config file on first run if missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

bitflags! {
    /// Options passed to `Context::open`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// Never use shared memory for captures
        const DISABLE_SHM = 1 << 0;
        /// Log every server notification at debug level
        const VERBOSE_EVENTS = 1 << 1;
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub events: EventsConfig,
    pub errors: ErrorsConfig,
}

/// Display connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Display name, `$DISPLAY` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Capture over the socket only
    pub disable_shm: bool,
}

/// Event loop and delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub verbose: bool,
    /// Capacity of the event queue handed out by `start_queue`
    pub queue_capacity: usize,
    /// Upper bound on how long the loop waits before checking for shutdown
    pub poll_interval_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            queue_capacity: 256,
            poll_interval_ms: 100,
        }
    }
}

/// Protocol error policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    /// Stop the loop once one resource caused this many errors. 0 never stops.
    pub max_errors_per_resource: u32,
}

/// Runtime knobs of one context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub flags: Flags,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub max_errors_per_resource: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default().settings()
    }
}

impl Settings {
    pub fn with_flags(flags: Flags) -> Self {
        Self { flags, ..Self::default() }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area-rootless");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::DISABLE_SHM, self.display.disable_shm);
        flags.set(Flags::VERBOSE_EVENTS, self.events.verbose);
        flags
    }

    pub fn settings(&self) -> Settings {
        Settings {
            flags: self.flags(),
            queue_capacity: self.events.queue_capacity.max(1),
            poll_interval: Duration::from_millis(self.events.poll_interval_ms.max(1)),
            max_errors_per_resource: self.errors.max_errors_per_resource,
        }
    }
}
