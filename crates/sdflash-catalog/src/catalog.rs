//! Firmware catalog and selection menu
//!
//! A [`Catalog`] is built once from manifest bytes and never edited. The
//! [`CatalogStore`] handle swaps whole catalogs so readers always see either
//! the old or the new one.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::{CatalogError, CatalogResult};
use crate::manifest::parse_manifest;
use crate::record::FirmwareRecord;

/// Reserved identifier of the synthetic exit entry. Selecting it means
/// "erase the target, do not flash".
pub const EXIT_SENTINEL_ID: &str = "NULL";

/// One selectable line of the device menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    /// Text shown on the display
    pub label: String,

    /// Firmware identifier, or [`EXIT_SENTINEL_ID`]
    pub id: String,
}

impl MenuEntry {
    /// Whether this is the synthetic exit/erase entry.
    pub fn is_exit(&self) -> bool {
        self.id == EXIT_SENTINEL_ID
    }

    fn for_record(position: usize, record: &FirmwareRecord) -> Self {
        let name = [record.device_type.as_str(), record.version.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            label: format!("{position}. {name}"),
            id: record.fw_id.clone(),
        }
    }

    fn exit(position: usize) -> Self {
        Self {
            label: format!("{position}. (Exit)"),
            id: EXIT_SENTINEL_ID.to_string(),
        }
    }
}

/// Immutable set of firmware records in manifest order.
#[derive(Debug, Clone)]
pub struct Catalog {
    records: Vec<FirmwareRecord>,
    index: HashMap<String, usize>,
    menu: Vec<MenuEntry>,
    skipped: usize,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::from_records(Vec::new(), 0)
    }
}

impl Catalog {
    /// Parse a manifest into a new catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::ManifestParse`] if the manifest is not a valid
    /// JSON array. Unusable entries are skipped, not reported as errors.
    pub fn load(manifest: &[u8]) -> CatalogResult<Self> {
        let parsed = parse_manifest(manifest)?;
        let catalog = Self::from_records(parsed.records, parsed.skipped);
        info!(
            firmware_count = catalog.len(),
            skipped = catalog.skipped,
            "Firmware catalog loaded"
        );
        Ok(catalog)
    }

    fn from_records(records: Vec<FirmwareRecord>, skipped: usize) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.fw_id.clone(), i))
            .collect();

        let mut menu: Vec<MenuEntry> = records
            .iter()
            .enumerate()
            .map(|(i, record)| MenuEntry::for_record(i.saturating_add(1), record))
            .collect();
        menu.push(MenuEntry::exit(records.len().saturating_add(1)));

        Self {
            records,
            index,
            menu,
            skipped,
        }
    }

    /// Look up a record by exact identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::FirmwareNotFound`] if no record matches. The
    /// exit sentinel never resolves.
    pub fn resolve(&self, fw_id: &str) -> CatalogResult<&FirmwareRecord> {
        self.index
            .get(fw_id)
            .and_then(|&i| self.records.get(i))
            .ok_or_else(|| CatalogError::FirmwareNotFound(fw_id.to_string()))
    }

    /// Menu listing in manifest order, followed by the exit entry.
    pub fn list(&self) -> &[MenuEntry] {
        &self.menu
    }

    /// All records in manifest order.
    pub fn records(&self) -> &[FirmwareRecord] {
        &self.records
    }

    /// Number of real firmware records (the exit entry is not counted).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the catalog holds no firmware records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of manifest entries skipped while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Shared handle to the current catalog.
///
/// Reloads parse into a fresh catalog and then swap it in. A failed reload
/// leaves the previous catalog in place.
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    /// Create a store serving the given catalog.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Get the catalog currently in service.
    pub fn snapshot(&self) -> Arc<Catalog> {
        let current = self.current.read();
        Arc::clone(&*current)
    }

    /// Replace the catalog in service.
    pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let catalog = Arc::new(catalog);
        *self.current.write() = Arc::clone(&catalog);
        catalog
    }

    /// Parse manifest bytes and, on success, swap the result in.
    ///
    /// # Errors
    ///
    /// Returns the parse error and keeps the previous catalog if the manifest
    /// is malformed.
    pub fn reload(&self, manifest: &[u8]) -> CatalogResult<Arc<Catalog>> {
        let catalog = Catalog::load(manifest)?;
        Ok(self.replace(catalog))
    }

    /// Resolve against the current snapshot, returning an owned record.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::FirmwareNotFound`] if no record matches.
    pub fn resolve(&self, fw_id: &str) -> CatalogResult<FirmwareRecord> {
        self.snapshot().resolve(fw_id).cloned()
    }

    /// Menu listing of the current snapshot.
    pub fn list(&self) -> Vec<MenuEntry> {
        self.snapshot().list().to_vec()
    }
}
