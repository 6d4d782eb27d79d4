//! Sender configuration.

use crate::error::{DeliveryError, DeliveryResult};
use command_spool::SpoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;

/// Default spool file name under the data directory.
pub const DEFAULT_SPOOL_FILE_NAME: &str = "command-spool.dat";

/// Configuration for a command sender, fixed for the lifetime of one
/// sender instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSenderConfig {
    /// Directory holding the sender's persistent state.
    pub data_directory: PathBuf,
    /// Timeout applied to a send attempt unless the command overrides it.
    pub default_timeout_millis: u64,
    /// Maximum number of commands in transmission at any instant.
    pub max_concurrent: usize,
    /// Spool file name under `data_directory`; `None` disables durable
    /// spooling entirely.
    pub command_spool_file_name: Option<String>,
    /// Maximum spool file size in bytes.
    pub command_spool_file_max_size: u64,
    /// Percentage of the oldest spool records purged per compaction pass.
    pub command_spool_file_purge_percentage: u8,
    /// Whether spool record payloads are compressed.
    pub command_spool_file_compress_data: bool,
    /// Pause between retry attempts.
    pub retry_interval_millis: u64,
    /// Maximum retries for reached-but-failed commands. Connection
    /// failures ignore this and retry until the endpoint heals.
    pub max_retries: u32,
    /// Capacity of the in-memory command queue.
    pub queue_size: usize,
    /// Whether queue admission throttling is enabled.
    pub enable_queue_throttling: bool,
    /// Queue throttle: releases allowed per burst period.
    pub queue_throttle_max_commands: u32,
    /// Queue throttle: rolling burst period.
    pub queue_throttle_burst_period_millis: u64,
    /// Whether send throttling is enabled.
    pub enable_send_throttling: bool,
    /// Send throttle: sends allowed per burst.
    pub send_throttle_max_commands: u32,
    /// Send throttle: mandatory quiet period after a burst.
    pub send_throttle_quiet_period_duration_millis: u64,
    /// Interval for polling endpoint reachability and replaying spooled
    /// commands; zero disables polling.
    pub server_polling_interval_millis: u64,
}

impl Default for CommandSenderConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            default_timeout_millis: DEFAULT_TIMEOUT_MILLIS,
            max_concurrent: 4,
            command_spool_file_name: Some(DEFAULT_SPOOL_FILE_NAME.to_string()),
            command_spool_file_max_size: 10 * 1024 * 1024,
            command_spool_file_purge_percentage: 25,
            command_spool_file_compress_data: false,
            retry_interval_millis: 15_000,
            max_retries: 10,
            queue_size: 10_000,
            enable_queue_throttling: false,
            queue_throttle_max_commands: 50,
            queue_throttle_burst_period_millis: 6_000,
            enable_send_throttling: false,
            send_throttle_max_commands: 100,
            send_throttle_quiet_period_duration_millis: 5_000,
            server_polling_interval_millis: 60_000,
        }
    }
}

impl CommandSenderConfig {
    /// Check the configuration for values the sender cannot run with.
    pub fn validate(&self) -> DeliveryResult<()> {
        if self.max_concurrent == 0 {
            return Err(DeliveryError::Config(
                "max_concurrent must be >= 1".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(DeliveryError::Config("queue_size must be >= 1".to_string()));
        }
        if self.default_timeout_millis == 0 {
            return Err(DeliveryError::Config(
                "default_timeout_millis must be >= 1".to_string(),
            ));
        }
        if self.command_spool_file_purge_percentage > 100 {
            return Err(DeliveryError::Config(format!(
                "command_spool_file_purge_percentage must be 0-100, got {}",
                self.command_spool_file_purge_percentage
            )));
        }
        if self.enable_queue_throttling && self.queue_throttle_max_commands == 0 {
            return Err(DeliveryError::Config(
                "queue_throttle_max_commands must be >= 1 when queue throttling is enabled"
                    .to_string(),
            ));
        }
        if self.enable_send_throttling && self.send_throttle_max_commands == 0 {
            return Err(DeliveryError::Config(
                "send_throttle_max_commands must be >= 1 when send throttling is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// The default per-command timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_millis)
    }

    /// The retry pause as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_millis)
    }

    /// The queue throttle's burst period as a `Duration`.
    pub fn queue_throttle_burst_period(&self) -> Duration {
        Duration::from_millis(self.queue_throttle_burst_period_millis)
    }

    /// The send throttle's quiet period as a `Duration`.
    pub fn send_throttle_quiet_period(&self) -> Duration {
        Duration::from_millis(self.send_throttle_quiet_period_duration_millis)
    }

    /// The server polling interval, `None` when polling is disabled.
    pub fn server_polling_interval(&self) -> Option<Duration> {
        (self.server_polling_interval_millis > 0)
            .then(|| Duration::from_millis(self.server_polling_interval_millis))
    }

    /// The spool configuration, `None` when spooling is disabled.
    pub fn spool_config(&self) -> Option<SpoolConfig> {
        self.command_spool_file_name
            .as_ref()
            .map(|name| SpoolConfig {
                path: self.data_directory.join(name),
                max_size_bytes: self.command_spool_file_max_size,
                purge_percentage: self.command_spool_file_purge_percentage,
                compress: self.command_spool_file_compress_data,
            })
    }

    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> DeliveryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> DeliveryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// An explicitly owned, file-backed configuration cache.
///
/// Callers hold one of these and pass it by reference; there is no global
/// configuration state. The cached value is refreshed only when the file's
/// modification time differs from the one recorded at the last load.
pub struct ConfigCache {
    path: PathBuf,
    modified: Option<SystemTime>,
    config: CommandSenderConfig,
}

impl ConfigCache {
    /// Load the cache from `path`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match CommandSenderConfig::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load sender configuration, using defaults"
                );
                CommandSenderConfig::default()
            }
        };
        let modified = file_modified(&path);
        Self {
            path,
            modified,
            config,
        }
    }

    /// The cached configuration.
    pub fn config(&self) -> &CommandSenderConfig {
        &self.config
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file if its modification time changed since the last
    /// load. Returns whether a reload happened.
    pub fn reload_if_changed(&mut self) -> DeliveryResult<bool> {
        let current = file_modified(&self.path);
        if current == self.modified {
            return Ok(false);
        }
        self.config = CommandSenderConfig::load_from_file(&self.path)?;
        self.modified = current;
        Ok(true)
    }
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
