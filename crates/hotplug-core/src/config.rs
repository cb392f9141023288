/*!
 * Configuration management for hotplug.
 *
 * Settings are layered: built-in defaults, then an optional configuration
 * file, then environment variables (`HOTPLUG__SECTION__KEY`).
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable prefix used by [`ConfigBuilder::with_default_environment`]
pub const ENV_PREFIX: &str = "hotplug";

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Device source configuration
    #[serde(default)]
    pub udev: UdevConfig,

    /// Mount/unmount/eject configuration
    #[serde(default)]
    pub actions: ActionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to print the event target
    #[serde(default = "default_true")]
    pub with_target: bool,

    /// Whether to colour the output
    #[serde(default = "default_true")]
    pub ansi: bool,
}

/// Netlink multicast group to listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetlinkGroup {
    /// Raw kernel uevents, before udev processing
    Kernel,
    /// Events re-broadcast by udevd after rule processing
    #[default]
    Udev,
}

impl NetlinkGroup {
    /// Multicast group bitmask of this group
    pub fn mask(self) -> u32 {
        match self {
            Self::Kernel => 1,
            Self::Udev => 2,
        }
    }
}

/// Device source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdevConfig {
    /// Root of the sysfs mount
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    /// Directory holding the udev device database
    #[serde(default = "default_udev_db")]
    pub udev_db: String,

    /// Mount table to consult for accessibility
    #[serde(default = "default_mount_table")]
    pub mount_table: String,

    /// CPU description text
    #[serde(default = "default_cpuinfo")]
    pub cpuinfo: String,

    /// Prefix of every device identifier
    #[serde(default = "default_udi_prefix")]
    pub udi_prefix: String,

    /// Subsystems to enumerate and monitor
    #[serde(default = "default_subsystems")]
    pub subsystems: Vec<String>,

    /// Netlink group the monitor subscribes to
    #[serde(default)]
    pub monitor_group: NetlinkGroup,

    /// Requested socket receive buffer in bytes (0 keeps the kernel default)
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
}

/// Mount/unmount/eject configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Base directory for mount points; a per-user data directory when unset
    #[serde(default)]
    pub media_dir: Option<String>,

    /// Privilege escalation wrapper, prepended to the helper command line
    #[serde(default = "default_escalation")]
    pub escalation: Vec<String>,

    /// Mount helper
    #[serde(default = "default_mount_command")]
    pub mount_command: String,

    /// Unmount helper
    #[serde(default = "default_unmount_command")]
    pub unmount_command: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            ansi: true,
        }
    }
}

impl Default for UdevConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            udev_db: default_udev_db(),
            mount_table: default_mount_table(),
            cpuinfo: default_cpuinfo(),
            udi_prefix: default_udi_prefix(),
            subsystems: default_subsystems(),
            monitor_group: NetlinkGroup::default(),
            receive_buffer_size: default_receive_buffer_size(),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            media_dir: None,
            escalation: default_escalation(),
            mount_command: default_mount_command(),
            unmount_command: default_unmount_command(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sysfs_root() -> String {
    "/sys".to_string()
}

fn default_udev_db() -> String {
    "/run/udev/data".to_string()
}

fn default_mount_table() -> String {
    "/proc/self/mountinfo".to_string()
}

fn default_cpuinfo() -> String {
    "/proc/cpuinfo".to_string()
}

fn default_udi_prefix() -> String {
    "/org/kde/solid/udev".to_string()
}

fn default_subsystems() -> Vec<String> {
    [
        "block",
        "power_supply",
        "processor",
        "cpu",
        "sound",
        "video4linux",
        "net",
        "usb",
        "input",
        "dvb",
        "tty",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_receive_buffer_size() -> usize {
    1024 * 1024
}

fn default_escalation() -> Vec<String> {
    vec!["pkexec".to_string()]
}

fn default_mount_command() -> String {
    "mount".to_string()
}

fn default_unmount_command() -> String {
    "umount".to_string()
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Read overrides from `HOTPLUG__*` variables
    pub fn with_default_environment(self) -> Self {
        self.with_environment_prefix(ENV_PREFIX)
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let defaults = ConfigLib::try_from(&Config::default())
            .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?;
        let mut builder = ConfigLib::builder().add_source(defaults);

        if let Some(config_file) = self.config_file {
            if Path::new(&config_file).exists() {
                debug!("Loading configuration from {}", config_file);
                builder = builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            builder = builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }
}

impl Config {
    /// Check values the device layer cannot work without
    pub fn validate(&self) -> Result<()> {
        if self.udev.udi_prefix.is_empty() || self.udev.udi_prefix.ends_with('/') {
            return Err(Error::config(format!(
                "udi_prefix must be non-empty and must not end with '/': {:?}",
                self.udev.udi_prefix
            )));
        }
        if self.udev.sysfs_root.is_empty() {
            return Err(Error::config("sysfs_root must not be empty"));
        }
        if self.actions.mount_command.is_empty() || self.actions.unmount_command.is_empty() {
            return Err(Error::config("mount and unmount commands must be set"));
        }
        Ok(())
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}
