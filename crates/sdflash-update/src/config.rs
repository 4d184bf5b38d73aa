//! Flasher configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Largest chunk the bootloader accepts in one write.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Rate the bootloader syncs at.
    ///
    /// Default: 115200.
    pub initial_baud: u32,

    /// Rate to switch to after the handshake, `None` to stay at the
    /// initial rate.
    ///
    /// Default: 460800.
    pub boost_baud: Option<u32>,

    /// How long to wait for the bootloader to answer the sync sequence.
    ///
    /// Default: 1000ms.
    pub handshake_timeout_ms: u64,
}

impl LinkConfig {
    /// Handshake timeout as a Duration.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_baud: 115_200,
            boost_baud: Some(460_800),
            handshake_timeout_ms: 1000,
        }
    }
}

/// Segment transfer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per write chunk.
    ///
    /// Default: 4096.
    pub chunk_size: usize,

    /// Upper bound on a single chunk write, unbounded when `None`.
    pub chunk_write_timeout_ms: Option<u64>,
}

impl TransferConfig {
    /// Per-chunk timeout as a Duration.
    #[must_use]
    pub fn chunk_write_timeout(&self) -> Option<Duration> {
        self.chunk_write_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            chunk_write_timeout_ms: None,
        }
    }
}

/// Reset sequencing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Added to every hold in the reset sequences, for targets with slow
    /// supervisors or long traces.
    ///
    /// Default: 0.
    pub extra_hold_ms: u64,

    /// Pulse the reset line after the bootloader reset command.
    ///
    /// Default: true.
    pub restart_pulse: bool,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            extra_hold_ms: 0,
            restart_pulse: true,
        }
    }
}

/// Top-level flasher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlasherConfig {
    /// Serial link settings.
    pub link: LinkConfig,

    /// Transfer settings.
    pub transfer: TransferConfig,

    /// Reset sequencing settings.
    pub reset: ResetConfig,

    /// Manifest location on the storage medium.
    ///
    /// Default: `/index.txt`.
    pub manifest_path: String,

    /// Return the target to its application after a failed flash.
    ///
    /// Default: true.
    pub reset_target_on_failure: bool,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            transfer: TransferConfig::default(),
            reset: ResetConfig::default(),
            manifest_path: "/index.txt".to_string(),
            reset_target_on_failure: true,
        }
    }
}

impl FlasherConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// configuration.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read flasher config {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid flasher config {}", path.display()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "transfer.chunk_size must not exceed {MAX_CHUNK_SIZE}"
            )));
        }
        if self.link.initial_baud == 0 {
            return Err(ConfigError::Invalid(
                "link.initial_baud must be greater than 0".to_string(),
            ));
        }
        if let Some(boost) = self.link.boost_baud
            && boost <= self.link.initial_baud
        {
            return Err(ConfigError::Invalid(format!(
                "link.boost_baud ({boost}) must be above link.initial_baud ({})",
                self.link.initial_baud
            )));
        }
        if self.link.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "link.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.manifest_path.is_empty() {
            return Err(ConfigError::Invalid(
                "manifest_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
