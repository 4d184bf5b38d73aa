//! Manifest parsing
//!
//! The manifest is a JSON array of firmware objects. Only malformed JSON (or a
//! root that is not an array) fails the load. Individual entries that cannot
//! be used are skipped with a warning so one bad line does not hide every
//! other firmware on the card.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::catalog::EXIT_SENTINEL_ID;
use crate::error::{CatalogError, CatalogResult};
use crate::record::{FirmwareRecord, SegmentSource};

/// One manifest object as written on the card. Every field except `fw_id`
/// is optional: a missing, `null` or wrongly typed value reads as empty.
struct ManifestEntry<'a> {
    index: usize,
    fields: &'a Map<String, Value>,
}

impl ManifestEntry<'_> {
    fn text(&self, key: &str) -> String {
        match self.fields.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                warn!(index = self.index, field = key, value = %other, "Field is not a string, reading as empty");
                String::new()
            }
        }
    }

    fn address(&self, key: &str) -> Option<u32> {
        let value = self.fields.get(key)?;
        if value.is_null() {
            return None;
        }
        let address = value.as_u64().and_then(|a| u32::try_from(a).ok());
        if address.is_none() {
            warn!(index = self.index, field = key, value = %value, "Address is not a 32-bit offset, using the default");
        }
        address
    }

    fn segment(&self, path: &str, md5: &str, address: &str) -> SegmentSource {
        SegmentSource {
            path: self.text(path),
            checksum: self.text(md5),
            address: self.address(address),
        }
    }

    fn record(&self, fw_id: String) -> FirmwareRecord {
        FirmwareRecord {
            fw_id,
            device_type: self.text("device_type"),
            version: self.text("version"),
            bootloader: self.segment("path_bootloader", "md5_bootloader", "address_bootloader"),
            partition_table: self.segment("path_partition", "md5_partition", "address_partition"),
            application: self.segment("path", "md5", "address"),
        }
    }
}

/// Outcome of parsing a manifest.
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    /// Usable records in manifest order
    pub records: Vec<FirmwareRecord>,

    /// Number of entries that were skipped
    pub skipped: usize,
}

/// Parse manifest bytes into records, preserving manifest order.
///
/// # Errors
///
/// Returns [`CatalogError::ManifestParse`] if the bytes are not valid JSON or
/// the root value is not an array.
pub fn parse_manifest(bytes: &[u8]) -> CatalogResult<ParsedManifest> {
    let root: Value = serde_json::from_slice(bytes)?;
    let Value::Array(entries) = root else {
        return Err(CatalogError::ManifestParse(
            "expected a JSON array of firmware entries".to_string(),
        ));
    };

    let mut parsed = ParsedManifest::default();
    let mut seen = HashSet::new();

    for (index, value) in entries.iter().enumerate() {
        let Value::Object(fields) = value else {
            warn!(index, "Firmware entry is not an object, skipping");
            parsed.skipped += 1;
            continue;
        };
        let entry = ManifestEntry { index, fields };

        let fw_id = match fields.get("fw_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                warn!(index, "Firmware entry without fw_id, skipping");
                parsed.skipped += 1;
                continue;
            }
        };

        if fw_id == EXIT_SENTINEL_ID {
            warn!(index, fw_id = %fw_id, "Firmware entry uses the reserved exit id, skipping");
            parsed.skipped += 1;
            continue;
        }

        if !seen.insert(fw_id.clone()) {
            warn!(index, fw_id = %fw_id, "Duplicate fw_id, keeping the first entry");
            parsed.skipped += 1;
            continue;
        }

        let record = entry.record(fw_id);
        debug!(fw_id = %record.fw_id, path = %record.application.path, "Loaded firmware entry");
        parsed.records.push(record);
    }

    Ok(parsed)
}
