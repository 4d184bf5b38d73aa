//! Target reset sequencing
//!
//! Two control lines put the target into its bootloader or back into the
//! application. The sequences are tables of [`PulseStep`]s run by one timed
//! step runner. Every hold is a lower bound: `extra_hold_ms` can lengthen
//! them, nothing shortens them.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ResetConfig;
use crate::error::{FlashError, GpioError};
use crate::loader::BootloaderClient;

/// Control line wired to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLineId {
    /// Boot mode strap, low selects the bootloader
    ModeSelect,
    /// Active-low reset
    Reset,
}

impl fmt::Display for ControlLineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlLineId::ModeSelect => write!(f, "mode-select"),
            ControlLineId::Reset => write!(f, "reset"),
        }
    }
}

/// Output level of a control line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Driven low
    Low,
    /// Driven high
    High,
}

/// A single GPIO output
pub trait ControlLine: Send {
    /// Configure the pin as an output
    fn set_output(&mut self) -> Result<(), GpioError>;

    /// Drive the pin
    fn set_level(&mut self, level: Level) -> Result<(), GpioError>;
}

/// Drive `line` to `level` and hold it for at least `hold`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseStep {
    /// Line to drive
    pub line: ControlLineId,
    /// Level to drive it to
    pub level: Level,
    /// Minimum hold time
    pub hold: Duration,
}

impl PulseStep {
    const fn new(line: ControlLineId, level: Level, hold_ms: u64) -> Self {
        Self {
            line,
            level,
            hold: Duration::from_millis(hold_ms),
        }
    }
}

/// Strap the target into its serial bootloader.
pub const ENTER_BOOTLOADER_SEQUENCE: [PulseStep; 4] = [
    PulseStep::new(ControlLineId::ModeSelect, Level::Low, 50),
    PulseStep::new(ControlLineId::Reset, Level::Low, 100),
    PulseStep::new(ControlLineId::Reset, Level::High, 120),
    PulseStep::new(ControlLineId::ModeSelect, Level::High, 200),
];

/// Reset the target with the mode strap released so it boots the application.
pub const RESTART_PULSE_SEQUENCE: [PulseStep; 3] = [
    PulseStep::new(ControlLineId::ModeSelect, Level::High, 50),
    PulseStep::new(ControlLineId::Reset, Level::Low, 50),
    PulseStep::new(ControlLineId::Reset, Level::High, 200),
];

/// Minimum time the application gets to start after leaving the bootloader.
pub const SETTLE_TIME: Duration = Duration::from_millis(200);

/// Drives the mode-select and reset lines
pub struct TargetResetController {
    mode_select: Box<dyn ControlLine>,
    reset: Box<dyn ControlLine>,
    config: ResetConfig,
}

impl TargetResetController {
    /// Create a controller over the two lines.
    pub fn new(
        mode_select: Box<dyn ControlLine>,
        reset: Box<dyn ControlLine>,
        config: ResetConfig,
    ) -> Self {
        Self {
            mode_select,
            reset,
            config,
        }
    }

    /// Reset configuration in effect
    pub fn config(&self) -> &ResetConfig {
        &self.config
    }

    /// Put the target into its serial bootloader.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::HardwareFault`] if a line cannot be configured
    /// or driven.
    pub async fn enter_bootloader(&mut self) -> Result<(), FlashError> {
        info!("Entering target bootloader");
        self.configure_outputs()?;
        self.run_sequence(&ENTER_BOOTLOADER_SEQUENCE).await
    }

    /// Leave the bootloader and let the application start.
    ///
    /// The client's reset command is best effort: the target may already
    /// have dropped the link. The optional restart pulse then forces a clean
    /// boot, and its trailing hold doubles as the settle time.
    ///
    /// # Errors
    ///
    /// Returns [`FlashError::HardwareFault`] if a line cannot be driven.
    pub async fn exit_to_application(
        &mut self,
        client: &mut dyn BootloaderClient,
    ) -> Result<(), FlashError> {
        info!("Returning target to application");
        if let Err(e) = client.reset_target().await {
            warn!(error = %e, "Bootloader reset command failed");
        }

        if self.config.restart_pulse {
            self.configure_outputs()?;
            self.run_sequence(&RESTART_PULSE_SEQUENCE).await?;
        } else {
            tokio::time::sleep(self.extended(SETTLE_TIME)).await;
        }

        info!("Target running");
        Ok(())
    }

    fn configure_outputs(&mut self) -> Result<(), FlashError> {
        for id in [ControlLineId::ModeSelect, ControlLineId::Reset] {
            self.line(id)
                .set_output()
                .map_err(|e| hardware_fault(id, e))?;
        }
        Ok(())
    }

    async fn run_sequence(&mut self, steps: &[PulseStep]) -> Result<(), FlashError> {
        for step in steps {
            let hold = self.extended(step.hold);
            debug!(line = %step.line, level = ?step.level, hold = ?hold, "Pulse step");
            self.line(step.line)
                .set_level(step.level)
                .map_err(|e| hardware_fault(step.line, e))?;
            tokio::time::sleep(hold).await;
        }
        Ok(())
    }

    fn extended(&self, hold: Duration) -> Duration {
        hold.saturating_add(Duration::from_millis(self.config.extra_hold_ms))
    }

    fn line(&mut self, id: ControlLineId) -> &mut Box<dyn ControlLine> {
        match id {
            ControlLineId::ModeSelect => &mut self.mode_select,
            ControlLineId::Reset => &mut self.reset,
        }
    }
}

impl fmt::Debug for TargetResetController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetResetController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn hardware_fault(line: ControlLineId, e: GpioError) -> FlashError {
    FlashError::HardwareFault {
        line,
        reason: e.reason,
    }
}
