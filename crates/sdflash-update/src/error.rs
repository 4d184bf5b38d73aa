//! Error types for flashing operations
//!
//! [`FlashError`] is the session-level taxonomy. Collaborator traits report
//! their own narrower errors ([`StorageError`], [`LoaderError`],
//! [`GpioError`]) which the session maps into it with the context it knows
//! (path, address, line).

use sdflash_catalog::CatalogError;
use thiserror::Error;

use crate::reset::ControlLineId;

/// Errors that can occur during a flashing session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    /// Storage medium is not mounted
    #[error("Storage medium is not mounted")]
    StorageUnavailable,

    /// Image file could not be opened
    #[error("File not found: {path}")]
    StorageNotFound {
        /// Path on the storage medium
        path: String,
    },

    /// Image file has zero length
    #[error("File is empty: {path}")]
    StorageEmpty {
        /// Path on the storage medium
        path: String,
    },

    /// Image file could not be read to the end
    #[error("Failed to read {path}: {reason}")]
    StorageRead {
        /// Path on the storage medium
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Manifest could not be parsed
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    /// Firmware identifier is not in the catalog
    #[error("Firmware not found: {0}")]
    FirmwareNotFound(String),

    /// Record exists but cannot be flashed
    #[error("Firmware {fw_id} has no application image")]
    InvalidFirmwareRecord {
        /// Offending identifier
        fw_id: String,
    },

    /// Control line could not be configured or driven
    #[error("Hardware fault on {line} line: {reason}")]
    HardwareFault {
        /// Line that failed
        line: ControlLineId,
        /// Underlying failure
        reason: String,
    },

    /// Bootloader did not answer the sync sequence
    #[error("Failed to sync with target: {0}")]
    LinkSync(String),

    /// Link speed could not be raised (non-fatal)
    #[error("Failed to switch link to {baud} baud: {reason}")]
    RateNegotiation {
        /// Requested rate
        baud: u32,
        /// Underlying failure
        reason: String,
    },

    /// Destination rejected the write session or a chunk
    #[error("Write failed for {path} at offset {offset}: {reason}")]
    WriteFailure {
        /// Source path
        path: String,
        /// Byte offset within the image
        offset: u64,
        /// Underlying failure
        reason: String,
    },

    /// Bytes arrived but the digest over the written range is wrong
    #[error("Checksum mismatch for {path} at 0x{address:08x}: {reason}")]
    ChecksumMismatch {
        /// Source path
        path: String,
        /// Flash offset of the segment
        address: u32,
        /// Underlying failure
        reason: String,
    },

    /// Checksum text is neither empty nor a 32 character hex digest
    #[error("Malformed checksum {value:?}: expected 32 hex characters")]
    ChecksumMalformed {
        /// Checksum as written in the manifest
        value: String,
    },

    /// Target rejected the chip erase
    #[error("Chip erase failed: {0}")]
    EraseFailure(String),
}

impl FlashError {
    /// Whether a session may continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlashError::RateNegotiation { .. })
    }

    /// Title and message for the device display.
    ///
    /// Titles are distinct per error kind so an operator can tell wiring,
    /// storage and data problems apart from the banner alone.
    pub fn status_message(&self) -> (&'static str, String) {
        match self {
            FlashError::StorageUnavailable => ("SD Card Error", "Card not mounted".to_string()),
            FlashError::StorageNotFound { path } => ("File Missing", path.clone()),
            FlashError::StorageEmpty { path } => ("Empty File", path.clone()),
            FlashError::StorageRead { path, .. } => ("Read Error", path.clone()),
            FlashError::ManifestParse(_) => ("Bad Manifest", "Check index.txt".to_string()),
            FlashError::FirmwareNotFound(id) => ("Unknown FW", id.clone()),
            FlashError::InvalidFirmwareRecord { fw_id } => {
                ("Invalid FW", format!("{fw_id}: no app path"))
            }
            FlashError::HardwareFault { line, .. } => ("GPIO Fault", format!("{line} line")),
            FlashError::LinkSync(_) => ("No Target", "Check wiring/power".to_string()),
            FlashError::RateNegotiation { baud, .. } => {
                ("Baud Warning", format!("{baud} refused"))
            }
            FlashError::WriteFailure { offset, .. } => {
                ("Write Failed", format!("at offset {offset}"))
            }
            FlashError::ChecksumMismatch { address, .. } => {
                ("MD5 Mismatch", format!("at 0x{address:x}"))
            }
            FlashError::ChecksumMalformed { .. } => ("Bad MD5", "Check manifest".to_string()),
            FlashError::EraseFailure(_) => ("Erase Failed", "Target refused".to_string()),
        }
    }
}

impl From<CatalogError> for FlashError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::ManifestParse(reason) => FlashError::ManifestParse(reason),
            CatalogError::FirmwareNotFound(id) => FlashError::FirmwareNotFound(id),
        }
    }
}

impl From<StorageError> for FlashError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Unavailable => FlashError::StorageUnavailable,
            StorageError::NotFound(path) | StorageError::InvalidPath(path) => {
                FlashError::StorageNotFound { path }
            }
            StorageError::IoError { path, source } => FlashError::StorageRead {
                path,
                reason: source.to_string(),
            },
        }
    }
}

/// Errors reported by a storage collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    /// Medium is not mounted or was released
    #[error("Storage medium is not mounted")]
    Unavailable,

    /// No file at this path
    #[error("File not found: {0}")]
    NotFound(String),

    /// Path escapes the mount point or is not absolute
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// I/O error while accessing a file
    #[error("I/O error on {path}: {source}")]
    IoError {
        /// Path on the storage medium
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors reported by the bootloader client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// Target did not answer in time
    #[error("Timed out waiting for the target")]
    Timeout,

    /// Target answered with an error status
    #[error("Target rejected command: {0}")]
    Rejected(String),

    /// Digest computed by the target differs from the expected one
    #[error("Digest mismatch: target reported {actual}")]
    DigestMismatch {
        /// Hex digest reported by the target
        actual: String,
    },

    /// Serial link failure
    #[error("Serial link error: {0}")]
    Link(String),
}

/// Error driving a control line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("GPIO error: {reason}")]
pub struct GpioError {
    /// Underlying failure
    pub reason: String,
}

impl GpioError {
    /// Create a new GPIO error
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors in flasher configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration text could not be parsed
    #[error("Configuration parse error: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
