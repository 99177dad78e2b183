//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Characters accepted as the separator required in `file_prefix`.
const PREFIX_SEPARATORS: [char; 3] = ['_', '-', '.'];

/// Configuration for opening an engine.
///
/// All options have defaults; `Engine::open` validates the recognized
/// ranges before touching any file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding segments, indexes, and the catalog.
    pub database_path: PathBuf,

    /// Where the host should direct log output.
    ///
    /// The engine emits `tracing` events and never opens this file itself;
    /// the option is carried for the host's subscriber setup.
    pub logfile_path: Option<PathBuf>,

    /// Rotation size threshold in MiB. Valid range (0, 100].
    pub persist_after_mb: u64,

    /// Rotation age threshold in seconds. Valid range (4, 8_640_000].
    pub persist_after_secs: u64,

    /// Checkpoint period. Valid range (3s, 36_000s].
    pub flush_interval: Duration,

    /// Prefix distinguishing sealed segment files from the active segment.
    ///
    /// Must contain at least one separator character (`_`, `-`, or `.`).
    pub file_prefix: String,

    /// Enables verbose logging in the host's subscriber.
    pub debug: bool,

    /// Maximum key size in bytes. Valid range (100, 65_536].
    pub max_key_size_bytes: usize,

    /// Maximum serialized value size in bytes. Valid range [1024, 10 MiB].
    pub max_value_size_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./arkiv_data"),
            logfile_path: None,
            persist_after_mb: 5,
            persist_after_secs: 3600,
            flush_interval: Duration::from_secs(10),
            file_prefix: "seg_".to_string(),
            debug: false,
            max_key_size_bytes: 1024,
            max_value_size_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database directory.
    #[must_use]
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Sets the log file path hint for the host.
    #[must_use]
    pub fn logfile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.logfile_path = Some(path.into());
        self
    }

    /// Sets the rotation size threshold in MiB.
    #[must_use]
    pub const fn persist_after_mb(mut self, mb: u64) -> Self {
        self.persist_after_mb = mb;
        self
    }

    /// Sets the rotation age threshold in seconds.
    #[must_use]
    pub const fn persist_after_secs(mut self, secs: u64) -> Self {
        self.persist_after_secs = secs;
        self
    }

    /// Sets the checkpoint period.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the sealed-segment file prefix.
    #[must_use]
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Sets verbose logging.
    #[must_use]
    pub const fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }

    /// Sets the maximum key size in bytes.
    #[must_use]
    pub const fn max_key_size_bytes(mut self, size: usize) -> Self {
        self.max_key_size_bytes = size;
        self
    }

    /// Sets the maximum serialized value size in bytes.
    #[must_use]
    pub const fn max_value_size_bytes(mut self, size: usize) -> Self {
        self.max_value_size_bytes = size;
        self
    }

    /// Returns the rotation size threshold in bytes.
    #[must_use]
    pub(crate) const fn rotate_size_bytes(&self) -> u64 {
        self.persist_after_mb * 1024 * 1024
    }

    /// Returns the rotation age threshold as a duration.
    #[must_use]
    pub(crate) const fn rotate_age(&self) -> Duration {
        Duration::from_secs(self.persist_after_secs)
    }

    /// Validates all recognized option ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the offending option.
    pub fn validate(&self) -> CoreResult<()> {
        if self.persist_after_mb == 0 || self.persist_after_mb > 100 {
            return Err(CoreError::invalid_config(format!(
                "persist_after_mb must be in (0, 100], got {}",
                self.persist_after_mb
            )));
        }
        if self.persist_after_secs <= 4 || self.persist_after_secs > 8_640_000 {
            return Err(CoreError::invalid_config(format!(
                "persist_after_secs must be in (4, 8640000], got {}",
                self.persist_after_secs
            )));
        }
        let flush = self.flush_interval;
        if flush <= Duration::from_secs(3) || flush > Duration::from_secs(36_000) {
            return Err(CoreError::invalid_config(format!(
                "flush_interval must be in (3s, 36000s], got {flush:?}"
            )));
        }
        if !self.file_prefix.contains(PREFIX_SEPARATORS) {
            return Err(CoreError::invalid_config(format!(
                "file_prefix must contain a separator character, got {:?}",
                self.file_prefix
            )));
        }
        if self.max_key_size_bytes <= 100 || self.max_key_size_bytes > 65_536 {
            return Err(CoreError::invalid_config(format!(
                "max_key_size_bytes must be in (100, 65536], got {}",
                self.max_key_size_bytes
            )));
        }
        if self.max_value_size_bytes < 1024 || self.max_value_size_bytes > 10 * 1_048_576 {
            return Err(CoreError::invalid_config(format!(
                "max_value_size_bytes must be in [1024, 10485760], got {}",
                self.max_value_size_bytes
            )));
        }
        Ok(())
    }
}
