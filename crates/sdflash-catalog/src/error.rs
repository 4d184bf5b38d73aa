//! Error types for catalog operations

use thiserror::Error;

/// Errors that can occur while loading or querying the firmware catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Manifest bytes are not valid JSON or the root is not a sequence
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),

    /// No record with this identifier exists
    #[error("Firmware not found: {0}")]
    FirmwareNotFound(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        CatalogError::ManifestParse(e.to_string())
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;
