//! Configuration file support for rxpass.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RXPASS_*)
//! 3. `--config PATH`
//! 4. Local config file (./rxpass.toml)
//! 5. Global config file (~/.config/rxpass/config.toml)

use {
    directories::ProjectDirs,
    log::{debug, warn},
    rxpass::{Identity, SessionConfig},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "rxpass.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Flight controller port (e.g., "/dev/ttyACM0" or "COM5").
    pub port: Option<String>,
    /// Serial channel the receiver is wired to.
    pub channel: Option<u8>,
}

/// Passthrough configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassthroughConfig {
    /// `SERIAL_PASSTIMO` value in seconds, 0 keeps the bridge open.
    pub timeout_s: Option<u32>,
}

/// Receiver addressing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// MAVLink system id of the receiver.
    pub system_id: Option<u8>,
    /// MAVLink component id of the receiver.
    pub component_id: Option<u8>,
    /// Abort when the receiver refuses to arm.
    pub strict_arm: Option<bool>,
}

/// External programmer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgrammerConfig {
    /// Path to `STM32_Programmer_CLI`.
    pub tool: Option<PathBuf>,
    /// Erase the whole flash before writing.
    pub full_erase: Option<bool>,
    /// Seconds to wait for the bootloader before starting the tool.
    pub settle_s: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Passthrough settings.
    #[serde(default)]
    pub passthrough: PassthroughConfig,
    /// Receiver settings.
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Programmer settings.
    #[serde(default)]
    pub programmer: ProgrammerConfig,
}

impl Config {
    /// Load the global then the local configuration file.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// The usual files, then the file given with `--config` on top.
    pub fn load_with_override(path: &Path) -> Self {
        let mut config = Self::load();
        config.merge(Self::load_from_path(path));
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
        ProjectDirs::from("", "", "rxpass").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.channel.is_some() {
            self.connection.channel = other.connection.channel;
        }

        if other.passthrough.timeout_s.is_some() {
            self.passthrough.timeout_s = other.passthrough.timeout_s;
        }

        if other.receiver.system_id.is_some() {
            self.receiver.system_id = other.receiver.system_id;
        }
        if other.receiver.component_id.is_some() {
            self.receiver.component_id = other.receiver.component_id;
        }
        if other.receiver.strict_arm.is_some() {
            self.receiver.strict_arm = other.receiver.strict_arm;
        }

        if other.programmer.tool.is_some() {
            self.programmer.tool = other.programmer.tool;
        }
        if other.programmer.full_erase.is_some() {
            self.programmer.full_erase = other.programmer.full_erase;
        }
        if other.programmer.settle_s.is_some() {
            self.programmer.settle_s = other.programmer.settle_s;
        }
    }

    /// Handshake settings with the configured values applied.
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default();
        if let Some(timeout_s) = self.passthrough.timeout_s {
            session.passthrough_timeout_s = timeout_s;
        }
        session.receiver = Identity::new(
            self.receiver
                .system_id
                .unwrap_or(session.receiver.system_id),
            self.receiver
                .component_id
                .unwrap_or(session.receiver.component_id),
        );
        if let Some(strict_arm) = self.receiver.strict_arm {
            session.strict_arm = strict_arm;
        }
        session
    }

    /// Whether configured flashing erases the whole chip.
    pub fn full_erase(&self) -> bool {
        self.programmer
            .full_erase
            .unwrap_or(false)
    }

    /// Wait between the handshake and the programmer.
    pub fn programmer_settle(&self) -> Duration {
        self.programmer
            .settle_s
            .map_or(rxpass::programmer::DEFAULT_SETTLE, Duration::from_secs)
    }
}
