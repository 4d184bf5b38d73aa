//! Convenience re-exports for common catalog types

pub use crate::catalog::{Catalog, CatalogStore, EXIT_SENTINEL_ID, MenuEntry};
pub use crate::error::{CatalogError, CatalogResult};
pub use crate::record::{FirmwareRecord, SegmentKind, SegmentSource};
