//! Firmware catalog for sdflash
//!
//! Parses the firmware manifest stored on the removable medium into an ordered,
//! immutable catalog of firmware records and builds the selection menu shown
//! on the device.
//!
//! - [`record`]: firmware records, segments and default flash offsets
//! - [`manifest`]: lenient manifest parsing
//! - [`catalog`]: [`Catalog`], [`CatalogStore`] and the menu listing
//! - [`error`]: error types
//!
//! # Example
//!
//! ```rust
//! use sdflash_catalog::prelude::*;
//!
//! # fn main() -> Result<(), CatalogError> {
//! let catalog = Catalog::load(br#"[{"fw_id":"A","path":"/a.bin"}]"#)?;
//! assert_eq!(catalog.list().len(), 2);
//! assert_eq!(catalog.resolve("A")?.application.path, "/a.bin");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod catalog;
pub mod error;
pub mod manifest;
pub mod prelude;
pub mod record;

pub use catalog::{Catalog, CatalogStore, EXIT_SENTINEL_ID, MenuEntry};
pub use error::{CatalogError, CatalogResult};
pub use manifest::{ParsedManifest, parse_manifest};
pub use record::{
    APPLICATION_ADDRESS, BOOTLOADER_ADDRESS, FirmwareRecord, PARTITION_TABLE_ADDRESS,
    SegmentKind, SegmentSource,
};
