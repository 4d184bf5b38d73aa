//! Convenience re-exports for common flashing types

pub use crate::app::{AppOutcome, NextAction, UpdaterApp};
pub use crate::checksum::Md5Digest;
pub use crate::config::{FlasherConfig, LinkConfig, MAX_CHUNK_SIZE, ResetConfig, TransferConfig};
pub use crate::error::{ConfigError, FlashError, GpioError, LoaderError, StorageError};
pub use crate::loader::BootloaderClient;
pub use crate::reset::{ControlLine, ControlLineId, Level, SETTLE_TIME, TargetResetController};
pub use crate::session::{FlashSession, SegmentReport, SessionResult, SessionStage, SessionState};
pub use crate::status::{NullDisplay, StatusDisplay, TransferProgress};
pub use crate::storage::{FirmwareStorage, FsStorage, ImageReader, MemoryStorage, load_catalog};
pub use crate::transfer::{SegmentJob, TransferEngine, TransferReport, Verification};
pub use sdflash_catalog::prelude::*;
