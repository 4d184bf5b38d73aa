//! Segment transfer engine
//!
//! Streams one image from storage into an open bootloader write session in
//! fixed-size chunks, then asks the target to verify the written range.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use sdflash_catalog::{FirmwareRecord, SegmentKind};

use crate::checksum::Md5Digest;
use crate::config::MAX_CHUNK_SIZE;
use crate::error::FlashError;
use crate::loader::BootloaderClient;
use crate::status::{ProgressReporter, TransferProgress, progress_percent};
use crate::storage::{FirmwareStorage, ImageReader};

/// One image to write at one flash offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    /// Absolute path on the storage medium
    pub path: String,

    /// Flash offset
    pub address: u32,

    /// Expected digest, `None` skips verification
    pub checksum: Option<Md5Digest>,

    /// Bytes per write chunk, between 1 and [`MAX_CHUNK_SIZE`]
    pub chunk_size: usize,
}

impl SegmentJob {
    /// Build a job from manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::ChecksumMalformed`] if `checksum` is neither
    /// empty nor a 32 character hex digest.
    pub fn new(
        path: impl Into<String>,
        address: u32,
        checksum: &str,
        chunk_size: usize,
    ) -> Result<Self, FlashError> {
        Ok(Self {
            path: path.into(),
            address,
            checksum: Md5Digest::parse_optional(checksum)?,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        })
    }

    /// Derive the job for one segment of a record. Absent optional segments
    /// yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::InvalidFirmwareRecord`] when the application
    /// path is empty and [`FlashError::ChecksumMalformed`] for a bad digest.
    pub fn from_record(
        record: &FirmwareRecord,
        kind: SegmentKind,
        chunk_size: usize,
    ) -> Result<Option<Self>, FlashError> {
        let source = record.segment(kind);
        if !source.is_present() {
            if kind.is_required() {
                return Err(FlashError::InvalidFirmwareRecord {
                    fw_id: record.fw_id.clone(),
                });
            }
            return Ok(None);
        }
        Self::new(
            source.path.clone(),
            record.address_of(kind),
            &source.checksum,
            chunk_size,
        )
        .map(Some)
    }
}

/// Build every job for a record in write order, validating the whole record
/// before anything is written.
///
/// # Errors
///
/// See [`SegmentJob::from_record`].
pub fn plan_segments(
    record: &FirmwareRecord,
    chunk_size: usize,
) -> Result<Vec<(SegmentKind, SegmentJob)>, FlashError> {
    let mut plan = Vec::with_capacity(SegmentKind::WRITE_ORDER.len());
    for kind in SegmentKind::WRITE_ORDER {
        match SegmentJob::from_record(record, kind, chunk_size)? {
            Some(job) => plan.push((kind, job)),
            None => debug!(fw_id = %record.fw_id, segment = %kind, "Segment not provided, skipping"),
        }
    }
    Ok(plan)
}

/// Whether the target confirmed the written bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verification {
    /// Target digest matched the manifest checksum
    Verified,
    /// No checksum was provided, bytes were written but not checked
    Unverified,
}

/// Outcome of one successful segment transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    /// Source path
    pub path: String,

    /// Flash offset
    pub address: u32,

    /// Bytes written, always the full source size
    pub bytes_written: u64,

    /// Verification outcome
    pub verification: Verification,
}

impl TransferReport {
    /// Whether the target confirmed the digest
    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }
}

/// Streams segments into the bootloader
#[derive(Debug, Clone)]
pub struct TransferEngine {
    reporter: ProgressReporter,
    chunk_timeout: Option<Duration>,
}

impl TransferEngine {
    /// Create an engine publishing through `reporter`
    pub fn new(reporter: ProgressReporter, chunk_timeout: Option<Duration>) -> Self {
        Self {
            reporter,
            chunk_timeout,
        }
    }

    /// Write one segment.
    ///
    /// Not idempotent: a retry rewrites the region from the start.
    ///
    /// # Errors
    ///
    /// * [`FlashError::StorageNotFound`] / [`FlashError::StorageEmpty`] if the
    ///   source cannot be opened or has zero length
    /// * [`FlashError::StorageRead`] if the source ends early or fails
    /// * [`FlashError::WriteFailure`] if the target rejects the session or a
    ///   chunk
    /// * [`FlashError::ChecksumMismatch`] if verification fails
    pub async fn transfer(
        &self,
        storage: &dyn FirmwareStorage,
        client: &mut dyn BootloaderClient,
        job: &SegmentJob,
    ) -> Result<TransferReport, FlashError> {
        let mut reader = storage.open(&job.path).await?;
        let size = reader.size();
        if size == 0 {
            return Err(FlashError::StorageEmpty {
                path: job.path.clone(),
            });
        }

        let write_failure = |offset: u64, reason: String| FlashError::WriteFailure {
            path: job.path.clone(),
            offset,
            reason,
        };
        let total = u32::try_from(size).map_err(|e| {
            write_failure(0, format!("image of {size} bytes exceeds flash range: {e}"))
        })?;
        let chunk_size = u32::try_from(job.chunk_size).unwrap_or(u32::MAX);

        info!(
            path = %job.path,
            address = format_args!("0x{:x}", job.address),
            size,
            checksum = job.checksum.is_some(),
            "Writing segment"
        );
        client
            .begin_write(job.address, total, chunk_size)
            .await
            .map_err(|e| write_failure(0, e.to_string()))?;

        let mut chunk = vec![0u8; job.chunk_size];
        let mut offset: u64 = 0;
        while offset < size {
            let remaining = size.saturating_sub(offset);
            let want = usize::try_from(remaining).map_or(job.chunk_size, |r| r.min(job.chunk_size));
            chunk.resize(want, 0);

            let filled = fill(&mut *reader, &mut chunk)
                .await
                .map_err(|e| FlashError::StorageRead {
                    path: job.path.clone(),
                    reason: e.to_string(),
                })?;
            if filled < want {
                return Err(FlashError::StorageRead {
                    path: job.path.clone(),
                    reason: format!(
                        "source ended at {} of {size} bytes",
                        offset.saturating_add(filled as u64)
                    ),
                });
            }

            self.write_chunk(client, &chunk)
                .await
                .map_err(|reason| write_failure(offset, reason))?;
            offset = offset.saturating_add(want as u64);

            let percent = progress_percent(offset, size);
            debug!(path = %job.path, offset, percent, "Chunk written");
            self.reporter.progress(TransferProgress {
                path: job.path.clone(),
                bytes_transferred: offset,
                total_bytes: size,
                percent,
            });
        }

        let verification = match &job.checksum {
            Some(expected) => {
                client
                    .verify_checksum(job.address, total, expected)
                    .await
                    .map_err(|e| FlashError::ChecksumMismatch {
                        path: job.path.clone(),
                        address: job.address,
                        reason: e.to_string(),
                    })?;
                info!(path = %job.path, md5 = %expected, "Segment verified");
                Verification::Verified
            }
            None => {
                warn!(
                    path = %job.path,
                    address = format_args!("0x{:x}", job.address),
                    "No checksum provided, segment written unverified"
                );
                Verification::Unverified
            }
        };

        Ok(TransferReport {
            path: job.path.clone(),
            address: job.address,
            bytes_written: offset,
            verification,
        })
    }

    async fn write_chunk(
        &self,
        client: &mut dyn BootloaderClient,
        data: &[u8],
    ) -> Result<(), String> {
        match self.chunk_timeout {
            Some(limit) => match tokio::time::timeout(limit, client.write_chunk(data)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("chunk write timed out after {limit:?}")),
            },
            None => client.write_chunk(data).await.map_err(|e| e.to_string()),
        }
    }
}

/// Read until `buf` is full or the source ends.
async fn fill(reader: &mut dyn ImageReader, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while let Some(rest) = buf.get_mut(filled..) {
        if rest.is_empty() {
            break;
        }
        let n = reader.read(rest).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdflash_catalog::SegmentSource;

    fn record(app_path: &str, boot_md5: &str) -> FirmwareRecord {
        FirmwareRecord {
            fw_id: "FW".to_string(),
            device_type: String::new(),
            version: String::new(),
            bootloader: SegmentSource {
                path: "/boot.bin".to_string(),
                checksum: boot_md5.to_string(),
                address: None,
            },
            partition_table: SegmentSource::default(),
            application: SegmentSource {
                path: app_path.to_string(),
                checksum: String::new(),
                address: Some(0x20000),
            },
        }
    }

    #[test]
    fn test_plan_skips_absent_optional_segments() -> Result<(), FlashError> {
        let plan = plan_segments(&record("/app.bin", ""), 4096)?;
        let kinds: Vec<_> = plan.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![SegmentKind::Bootloader, SegmentKind::Application]);
        let addresses: Vec<_> = plan.iter().map(|(_, j)| j.address).collect();
        assert_eq!(addresses, vec![0x1000, 0x20000]);
        Ok(())
    }

    #[test]
    fn test_plan_rejects_missing_application() {
        assert_eq!(
            plan_segments(&record("", ""), 4096),
            Err(FlashError::InvalidFirmwareRecord {
                fw_id: "FW".to_string()
            })
        );
    }

    #[test]
    fn test_plan_rejects_any_malformed_checksum() {
        assert!(matches!(
            plan_segments(&record("/app.bin", "not-a-digest"), 4096),
            Err(FlashError::ChecksumMalformed { value }) if value == "not-a-digest"
        ));
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() -> Result<(), FlashError> {
        let job = SegmentJob::new("/a.bin", 0x10000, "", 0)?;
        assert_eq!(job.chunk_size, 1);
        assert!(job.checksum.is_none());
        Ok(())
    }

    #[test]
    fn test_oversized_chunk_size_is_clamped() -> Result<(), FlashError> {
        let job = SegmentJob::new("/a.bin", 0x10000, "", usize::MAX)?;
        assert_eq!(job.chunk_size, MAX_CHUNK_SIZE);

        let plan = plan_segments(&record("/app.bin", ""), usize::MAX)?;
        assert!(plan.iter().all(|(_, job)| job.chunk_size == MAX_CHUNK_SIZE));
        Ok(())
    }
}
