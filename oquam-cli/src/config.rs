//! Configuration file support for oquam.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (OQUAM_*)
//! 3. Local config file (./oquam.toml)
//! 4. Global config file (~/.config/oquam/config.toml)

use {
    anyhow::Context,
    directories::ProjectDirs,
    log::{debug, info},
    oquam::{DiscoveryConfig, GearRatio},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "oquam.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM6").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Motor steps per stage step, `[x, y, z]`.
    pub gears: Option<GearRatio>,
}

/// Discovery configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySection {
    /// Handshake read timeout in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
    /// Keywords marking likely controllers.
    pub keywords: Option<Vec<String>>,
    /// Description markers of ports never probed.
    pub skip_markers: Option<Vec<String>>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Stage configuration.
    #[serde(default)]
    pub stage: StageConfig,
    /// Discovery configuration.
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// File that `remember_port` writes to.
    #[serde(skip)]
    source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::load_from_file(&global_path)? {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global);
                config.source = Some(global_path);
            }
        }

        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if let Some(local) = Self::load_from_file(local_path)? {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local);
            config.source = Some(local_path.to_path_buf());
        }

        Ok(config)
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// A missing file yields the defaults; `remember_port` will create it.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load_from_file(path)?.unwrap_or_default();
        debug!("Using config file {}", path.display());
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .map_err(|e| oquam::Error::Config(format!("{}: {e}", path.display())))?;
        Ok(Some(config))
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "oquam").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.stage.gears.is_some() {
            self.stage.gears = other.stage.gears;
        }
        if other.discovery.handshake_timeout_ms.is_some() {
            self.discovery.handshake_timeout_ms = other.discovery.handshake_timeout_ms;
        }
        if other.discovery.keywords.is_some() {
            self.discovery.keywords = other.discovery.keywords;
        }
        if other.discovery.skip_markers.is_some() {
            self.discovery.skip_markers = other.discovery.skip_markers;
        }
    }

    /// Discovery settings with the configured overrides applied.
    pub fn discovery_config(&self) -> DiscoveryConfig {
        let mut discovery = DiscoveryConfig::default().with_preferred(self.connection.serial.clone());

        if let Some(ms) = self.discovery.handshake_timeout_ms {
            discovery = discovery.with_handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(keywords) = &self.discovery.keywords {
            discovery = discovery.with_keywords(keywords.iter().cloned());
        }
        if let Some(markers) = &self.discovery.skip_markers {
            discovery = discovery.with_skip_markers(markers.iter().cloned());
        }
        discovery
    }

    /// Path `remember_port` writes to: the file that was loaded last, else
    /// the global config file, else the local one.
    pub fn save_path(&self) -> PathBuf {
        self.source
            .clone()
            .or_else(Self::global_config_path)
            .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE))
    }

    /// Remember a confirmed port as the preferred device.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<PathBuf> {
        self.connection.serial = Some(port.to_string());

        let path = self.save_path();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        // Keep whatever else the file holds, only the port changes
        let mut on_disk = Self::load_from_file(&path)?.unwrap_or_default();
        on_disk.connection.serial = Some(port.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Saved port {port} to {}", path.display());

        Ok(path)
    }
}
