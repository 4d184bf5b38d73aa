//! Firmware flashing for sdflash
//!
//! Writes firmware from removable storage into a second microcontroller
//! through its serial bootloader:
//! - Catalog lookup and up-front validation of every segment
//! - Timed reset sequences on the mode-select and reset lines
//! - Chunked segment transfer with MD5 verification on the target
//! - Progress banners and a broadcast progress stream
//! - A menu-driven front end that flashes, erases and recovers the target
//!
//! # Architecture
//!
//! - [`session`]: the [`FlashSession`] state machine
//! - [`transfer`]: segment jobs and the transfer engine
//! - [`reset`]: control lines and reset sequences
//! - [`loader`]: bootloader client interface
//! - [`storage`]: storage interface, filesystem and in-memory backends
//! - [`status`]: display interface and progress reporting
//! - [`checksum`]: MD5 digests from the manifest
//! - [`app`]: menu selection handling
//! - [`config`]: flasher configuration
//! - [`error`]: error types
//!
//! The bootloader wire protocol and the GPIO driver are supplied by the
//! embedding firmware through [`BootloaderClient`] and [`ControlLine`].
//!
//! # Example
//!
//! ```ignore
//! use sdflash_update::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     client: Box<dyn BootloaderClient>,
//! #     mode_select: Box<dyn ControlLine>,
//! #     reset: Box<dyn ControlLine>,
//! # ) -> Result<(), FlashError> {
//! let config = FlasherConfig::default();
//! let storage: Arc<dyn FirmwareStorage> = Arc::new(FsStorage::new("/sdcard"));
//! let catalog = Arc::new(CatalogStore::new(
//!     load_catalog(storage.as_ref(), &config.manifest_path).await?,
//! ));
//! let reset = TargetResetController::new(mode_select, reset, config.reset.clone());
//! let session = FlashSession::new(config, catalog, storage, client, reset, Arc::new(NullDisplay));
//!
//! let mut app = UpdaterApp::new(session);
//! if let Some(entry) = app.menu().first() {
//!     let outcome = app.handle_selection(entry).await;
//!     println!("{:?}", outcome.action);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod app;
pub mod checksum;
pub mod config;
pub mod error;
pub mod loader;
pub mod prelude;
pub mod reset;
pub mod session;
pub mod status;
pub mod storage;
pub mod transfer;

pub use app::{AppOutcome, NextAction, UpdaterApp};
pub use checksum::Md5Digest;
pub use config::{FlasherConfig, LinkConfig, MAX_CHUNK_SIZE, ResetConfig, TransferConfig};
pub use error::{ConfigError, FlashError, GpioError, LoaderError, StorageError};
pub use loader::BootloaderClient;
pub use reset::{
    ControlLine, ControlLineId, ENTER_BOOTLOADER_SEQUENCE, Level, PulseStep,
    RESTART_PULSE_SEQUENCE, SETTLE_TIME, TargetResetController,
};
pub use session::{FlashSession, SegmentReport, SessionResult, SessionStage, SessionState};
pub use status::{NullDisplay, ProgressReporter, StatusDisplay, TransferProgress, progress_percent};
pub use storage::{FirmwareStorage, FsStorage, ImageReader, MemoryStorage, load_catalog};
pub use transfer::{
    SegmentJob, TransferEngine, TransferReport, Verification, plan_segments,
};
