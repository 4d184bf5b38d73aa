//! Flashing session state machine
//!
//! A session resolves a firmware id, straps the target into its bootloader,
//! syncs and speeds up the link, writes each segment in order, then returns
//! the target to its application. Any fatal error stops the session in
//! [`SessionState::Failed`] with the stage it happened in. Nothing is retried
//! and nothing is rolled back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use sdflash_catalog::{CatalogStore, EXIT_SENTINEL_ID, SegmentKind};

use crate::config::FlasherConfig;
use crate::error::FlashError;
use crate::loader::BootloaderClient;
use crate::reset::TargetResetController;
use crate::status::{ProgressReporter, StatusDisplay, TransferProgress};
use crate::storage::FirmwareStorage;
use crate::transfer::{TransferEngine, TransferReport, plan_segments};

/// Stages of a session, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionStage {
    /// Nothing started
    Idle,
    /// Looking up the record and validating it
    ResolvingFirmware,
    /// Running the bootloader entry sequence
    EnteringBootloader,
    /// Syncing with the bootloader
    Handshaking,
    /// Raising the link rate
    NegotiatingRate,
    /// Writing the second-stage bootloader
    TransferringBootloader,
    /// Writing the partition table
    TransferringPartitionTable,
    /// Writing the application
    TransferringApplication,
    /// Erasing the whole chip
    Erasing,
    /// Returning the target to its application
    ExitingBootloader,
    /// Finished successfully
    Complete,
}

impl SessionStage {
    /// Transfer stage for a segment.
    pub fn transferring(kind: SegmentKind) -> Self {
        match kind {
            SegmentKind::Bootloader => SessionStage::TransferringBootloader,
            SegmentKind::PartitionTable => SessionStage::TransferringPartitionTable,
            SegmentKind::Application => SessionStage::TransferringApplication,
        }
    }

    /// Whether the target may have been left in its bootloader when a
    /// session stops in this stage.
    pub fn target_touched(self) -> bool {
        matches!(
            self,
            SessionStage::EnteringBootloader
                | SessionStage::Handshaking
                | SessionStage::NegotiatingRate
                | SessionStage::TransferringBootloader
                | SessionStage::TransferringPartitionTable
                | SessionStage::TransferringApplication
                | SessionStage::Erasing
                | SessionStage::ExitingBootloader
        )
    }

    fn banner(self) -> Option<&'static str> {
        match self {
            SessionStage::EnteringBootloader => Some("Entering bootloader"),
            SessionStage::Handshaking => Some("Connecting..."),
            SessionStage::TransferringBootloader => Some("Bootloader"),
            SessionStage::TransferringPartitionTable => Some("Partition table"),
            SessionStage::TransferringApplication => Some("Application"),
            SessionStage::Erasing => Some("Please wait..."),
            SessionStage::ExitingBootloader => Some("Restarting target"),
            SessionStage::Idle
            | SessionStage::ResolvingFirmware
            | SessionStage::NegotiatingRate
            | SessionStage::Complete => None,
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStage::Idle => "idle",
            SessionStage::ResolvingFirmware => "resolving firmware",
            SessionStage::EnteringBootloader => "entering bootloader",
            SessionStage::Handshaking => "handshaking",
            SessionStage::NegotiatingRate => "negotiating rate",
            SessionStage::TransferringBootloader => "transferring bootloader",
            SessionStage::TransferringPartitionTable => "transferring partition table",
            SessionStage::TransferringApplication => "transferring application",
            SessionStage::Erasing => "erasing",
            SessionStage::ExitingBootloader => "exiting bootloader",
            SessionStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Current state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Running, idle or complete
    Stage(SessionStage),
    /// Stopped by a fatal error
    Failed {
        /// Stage the error happened in
        stage: SessionStage,
        /// What went wrong
        error: FlashError,
    },
}

impl SessionState {
    /// Stage reached, or the stage that failed
    pub fn stage(&self) -> SessionStage {
        match self {
            SessionState::Stage(stage) | SessionState::Failed { stage, .. } => *stage,
        }
    }

    /// Whether the session has finished, one way or the other
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stage(SessionStage::Complete) | SessionState::Failed { .. }
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Stage(SessionStage::Idle)
    }
}

/// Outcome of one segment within a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReport {
    /// Which segment
    pub kind: SegmentKind,
    /// Transfer details
    pub transfer: TransferReport,
}

/// Outcome of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    /// Firmware id, or the exit sentinel for an erase
    pub fw_id: String,

    /// Whether the session reached `Complete`
    pub success: bool,

    /// Stage the session stopped in when it failed
    pub failed_stage: Option<SessionStage>,

    /// Error that stopped the session
    pub error: Option<FlashError>,

    /// Segments written, in write order
    pub segments: Vec<SegmentReport>,

    /// Link rate in effect at the end
    pub baud: u32,

    /// Wall time of the session
    pub duration: Duration,
}

impl SessionResult {
    /// Segments written without a checksum
    pub fn unverified_segments(&self) -> impl Iterator<Item = &SegmentReport> + '_ {
        self.segments
            .iter()
            .filter(|segment| !segment.transfer.is_verified())
    }

    /// Whether the session succeeded and every segment was verified
    pub fn is_fully_verified(&self) -> bool {
        self.success && self.unverified_segments().next().is_none()
    }
}

/// Drives one target through flashing sessions, one at a time
pub struct FlashSession {
    config: FlasherConfig,
    catalog: Arc<CatalogStore>,
    storage: Arc<dyn FirmwareStorage>,
    client: Box<dyn BootloaderClient>,
    reset: TargetResetController,
    reporter: ProgressReporter,
    engine: TransferEngine,
    state: SessionState,
    history: Vec<SessionState>,
    baud: u32,
    title: &'static str,
}

impl FlashSession {
    /// Create a session over its collaborators
    pub fn new(
        config: FlasherConfig,
        catalog: Arc<CatalogStore>,
        storage: Arc<dyn FirmwareStorage>,
        client: Box<dyn BootloaderClient>,
        reset: TargetResetController,
        display: Arc<dyn StatusDisplay>,
    ) -> Self {
        let reporter = ProgressReporter::new(display);
        let engine = TransferEngine::new(
            reporter.clone(),
            config.transfer.chunk_write_timeout(),
        );
        let baud = config.link.initial_baud;
        Self {
            config,
            catalog,
            storage,
            client,
            reset,
            reporter,
            engine,
            state: SessionState::default(),
            history: Vec::new(),
            baud,
            title: "Flashing",
        }
    }

    /// Flash the firmware with this id.
    ///
    /// Failures are reported in the result, with the stage they happened in.
    pub async fn run(&mut self, fw_id: &str) -> SessionResult {
        let started = tokio::time::Instant::now();
        self.begin("Flashing");
        info!(fw_id = %fw_id, "Starting flash session");

        let mut segments = Vec::new();
        let outcome = self.flash(fw_id, &mut segments).await;
        self.finish(fw_id, outcome, segments, started, "Flash complete")
    }

    /// Erase the whole target flash, for the menu's exit entry.
    pub async fn erase_target(&mut self) -> SessionResult {
        let started = tokio::time::Instant::now();
        self.begin("Erasing");
        info!("Starting chip erase");

        let outcome = self.erase().await;
        self.finish(EXIT_SENTINEL_ID, outcome, Vec::new(), started, "Erase complete")
    }

    /// Return the target to its application after a failed session.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::HardwareFault`] if a control line fails.
    pub async fn recover_target(&mut self) -> Result<(), FlashError> {
        info!(state = ?self.state, "Recovering target");
        self.reset.exit_to_application(self.client.as_mut()).await
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state entered by the last session, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Subscribe to per-chunk progress
    pub fn subscribe_progress(&self) -> broadcast::Receiver<TransferProgress> {
        self.reporter.subscribe()
    }

    /// Configuration in effect
    pub fn config(&self) -> &FlasherConfig {
        &self.config
    }

    /// Shared catalog handle
    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    /// Storage collaborator
    pub fn storage(&self) -> &Arc<dyn FirmwareStorage> {
        &self.storage
    }

    /// Show a banner on the display
    pub fn show(&self, title: &str, message: &str) {
        self.reporter.banner(title, message);
    }

    async fn flash(
        &mut self,
        fw_id: &str,
        segments: &mut Vec<SegmentReport>,
    ) -> Result<(), FlashError> {
        self.enter(SessionStage::ResolvingFirmware);
        if !self.storage.is_available() {
            return Err(FlashError::StorageUnavailable);
        }
        let record = self.catalog.resolve(fw_id)?;
        let plan = plan_segments(&record, self.config.transfer.chunk_size)?;
        debug!(fw_id = %fw_id, segments = plan.len(), "Firmware resolved");

        self.prepare_target().await?;
        self.negotiate_rate().await?;

        for (kind, job) in &plan {
            self.enter(SessionStage::transferring(*kind));
            let transfer = self
                .engine
                .transfer(self.storage.as_ref(), self.client.as_mut(), job)
                .await?;
            segments.push(SegmentReport {
                kind: *kind,
                transfer,
            });
        }

        self.enter(SessionStage::ExitingBootloader);
        self.reset.exit_to_application(self.client.as_mut()).await?;

        self.complete().await;
        Ok(())
    }

    async fn erase(&mut self) -> Result<(), FlashError> {
        self.prepare_target().await?;

        self.enter(SessionStage::Erasing);
        self.client
            .erase_chip()
            .await
            .map_err(|e| FlashError::EraseFailure(e.to_string()))?;

        self.enter(SessionStage::ExitingBootloader);
        self.reset.exit_to_application(self.client.as_mut()).await?;

        self.complete().await;
        Ok(())
    }

    async fn prepare_target(&mut self) -> Result<(), FlashError> {
        self.enter(SessionStage::EnteringBootloader);
        self.reset.enter_bootloader().await?;

        self.enter(SessionStage::Handshaking);
        let timeout = self.config.link.handshake_timeout();
        match tokio::time::timeout(timeout, self.client.connect(timeout)).await {
            Ok(result) => result.map_err(|e| FlashError::LinkSync(e.to_string()))?,
            Err(_) => {
                return Err(FlashError::LinkSync(format!(
                    "no response from bootloader within {timeout:?}"
                )));
            }
        }
        info!(baud = self.baud, "Bootloader synced");
        Ok(())
    }

    async fn negotiate_rate(&mut self) -> Result<(), FlashError> {
        self.enter(SessionStage::NegotiatingRate);
        let Some(boost) = self.config.link.boost_baud else {
            debug!(baud = self.baud, "No boost rate configured");
            return Ok(());
        };

        match self.client.set_rate(boost).await {
            Ok(()) => {
                self.baud = boost;
                info!(baud = boost, "Link rate raised");
                Ok(())
            }
            Err(e) => {
                let err = FlashError::RateNegotiation {
                    baud: boost,
                    reason: e.to_string(),
                };
                warn!(error = %err, baud = self.baud, "Continuing at initial rate");
                Ok(())
            }
        }
    }

    async fn complete(&mut self) {
        self.enter(SessionStage::Complete);
        if let Err(e) = self.storage.release().await {
            warn!(error = %e, "Failed to release storage");
        }
    }

    fn begin(&mut self, title: &'static str) {
        self.title = title;
        self.state = SessionState::default();
        self.history.clear();
        self.history.push(self.state.clone());
        self.baud = self.config.link.initial_baud;
    }

    fn enter(&mut self, stage: SessionStage) {
        info!(stage = %stage, "Session stage");
        self.state = SessionState::Stage(stage);
        self.history.push(self.state.clone());
        if let Some(message) = stage.banner() {
            self.reporter.banner(self.title, message);
        }
    }

    fn finish(
        &mut self,
        fw_id: &str,
        outcome: Result<(), FlashError>,
        segments: Vec<SegmentReport>,
        started: tokio::time::Instant,
        done_message: &str,
    ) -> SessionResult {
        let duration = started.elapsed();
        let mut result = SessionResult {
            fw_id: fw_id.to_string(),
            success: false,
            failed_stage: None,
            error: None,
            segments,
            baud: self.baud,
            duration,
        };

        match outcome {
            Ok(()) => {
                result.success = true;
                let unverified = result.unverified_segments().count();
                info!(
                    fw_id = %fw_id,
                    segments = result.segments.len(),
                    unverified,
                    duration = ?duration,
                    "Session complete"
                );
                if unverified > 0 {
                    self.reporter
                        .banner("UNVERIFIED", &format!("{unverified} segment(s) unchecked"));
                } else {
                    self.reporter.banner("Success", done_message);
                }
            }
            Err(err) => {
                let stage = self.state.stage();
                error!(fw_id = %fw_id, stage = %stage, error = %err, "Session failed");
                let (title, message) = err.status_message();
                self.reporter.banner(title, &message);

                self.state = SessionState::Failed {
                    stage,
                    error: err.clone(),
                };
                self.history.push(self.state.clone());
                result.failed_stage = Some(stage);
                result.error = Some(err);
            }
        }
        result
    }
}

impl fmt::Debug for FlashSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashSession")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("baud", &self.baud)
            .finish_non_exhaustive()
    }
}
