//! Firmware record model
//!
//! A record describes one firmware release as it appears in the manifest:
//! the device it targets, its version, and the image segments that make it up.

use serde::{Deserialize, Serialize};

/// Default flash offset of the second-stage bootloader image.
pub const BOOTLOADER_ADDRESS: u32 = 0x1000;

/// Default flash offset of the partition table image.
pub const PARTITION_TABLE_ADDRESS: u32 = 0x8000;

/// Default flash offset of the application image.
pub const APPLICATION_ADDRESS: u32 = 0x10000;

/// One contiguous image written to a fixed region of target flash.
///
/// The declaration order is the write order. The bootloader must land first
/// so later stages can run, and the partition table must exist before the
/// application offset means anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Second-stage bootloader
    Bootloader,
    /// Partition table
    PartitionTable,
    /// Application image (the primary segment)
    Application,
}

impl SegmentKind {
    /// All segments in the order they must be written.
    pub const WRITE_ORDER: [SegmentKind; 3] = [
        SegmentKind::Bootloader,
        SegmentKind::PartitionTable,
        SegmentKind::Application,
    ];

    /// Flash offset used when the record does not override it.
    pub fn default_address(self) -> u32 {
        match self {
            SegmentKind::Bootloader => BOOTLOADER_ADDRESS,
            SegmentKind::PartitionTable => PARTITION_TABLE_ADDRESS,
            SegmentKind::Application => APPLICATION_ADDRESS,
        }
    }

    /// Whether a record is unusable without this segment.
    pub fn is_required(self) -> bool {
        matches!(self, SegmentKind::Application)
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Bootloader => write!(f, "bootloader"),
            SegmentKind::PartitionTable => write!(f, "partition table"),
            SegmentKind::Application => write!(f, "application"),
        }
    }
}

/// Source of one segment as declared in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSource {
    /// Absolute path on the storage medium, empty when the segment is absent
    pub path: String,

    /// Hex MD5 digest of the image, empty when verification is skipped
    pub checksum: String,

    /// Per-record flash offset override
    pub address: Option<u32>,
}

impl SegmentSource {
    /// Whether the manifest named a file for this segment.
    pub fn is_present(&self) -> bool {
        !self.path.is_empty()
    }
}

/// A firmware release loaded from the manifest.
///
/// Records are immutable once loaded. Reloading the catalog replaces them
/// wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRecord {
    /// Unique identifier within the catalog
    pub fw_id: String,

    /// Target device type, e.g. "ESP32-S3-DevKit"
    pub device_type: String,

    /// Release version string
    pub version: String,

    /// Second-stage bootloader image
    pub bootloader: SegmentSource,

    /// Partition table image
    pub partition_table: SegmentSource,

    /// Application image
    pub application: SegmentSource,
}

impl FirmwareRecord {
    /// Get the declared source for a segment.
    pub fn segment(&self, kind: SegmentKind) -> &SegmentSource {
        match kind {
            SegmentKind::Bootloader => &self.bootloader,
            SegmentKind::PartitionTable => &self.partition_table,
            SegmentKind::Application => &self.application,
        }
    }

    /// Flash offset for a segment, honouring per-record overrides.
    pub fn address_of(&self, kind: SegmentKind) -> u32 {
        self.segment(kind)
            .address
            .unwrap_or_else(|| kind.default_address())
    }

    /// A record without an application image must never be flashed.
    pub fn is_flashable(&self) -> bool {
        self.application.is_present()
    }

    /// Segments present in this record, in write order.
    pub fn present_segments(&self) -> impl Iterator<Item = SegmentKind> + '_ {
        SegmentKind::WRITE_ORDER
            .into_iter()
            .filter(|kind| self.segment(*kind).is_present())
    }
}
