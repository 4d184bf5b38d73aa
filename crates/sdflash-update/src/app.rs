//! Menu-driven updater
//!
//! What the device main loop calls when the operator picks a menu entry.
//! The exit entry erases the target, every other entry flashes it. After a
//! session the caller either restarts the host or shows the menu again.

use std::sync::Arc;
use tracing::{info, warn};

use sdflash_catalog::{Catalog, MenuEntry};

use crate::error::FlashError;
use crate::session::{FlashSession, SessionResult, SessionStage};
use crate::storage::load_catalog;

/// What the caller should do after a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Restart the controller so it boots fresh with the medium released
    RestartHost,
    /// Show the menu again
    ReturnToMenu,
}

/// Result of handling one menu selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOutcome {
    /// Session outcome
    pub result: SessionResult,
    /// Follow-up for the caller
    pub action: NextAction,
}

/// Ties the catalog menu to flashing sessions
#[derive(Debug)]
pub struct UpdaterApp {
    session: FlashSession,
}

impl UpdaterApp {
    /// Create an app around a session
    pub fn new(session: FlashSession) -> Self {
        Self { session }
    }

    /// The underlying session
    pub fn session(&self) -> &FlashSession {
        &self.session
    }

    /// Menu entries to offer, exit entry last
    pub fn menu(&self) -> Vec<MenuEntry> {
        self.session.catalog().list()
    }

    /// Re-read the manifest from storage and swap the catalog in.
    ///
    /// The previous catalog stays in service if the manifest cannot be read
    /// or parsed.
    ///
    /// # Errors
    ///
    /// Returns the storage or parse error after showing it on the display.
    pub async fn reload_catalog(&self) -> Result<Arc<Catalog>, FlashError> {
        let manifest_path = self.session.config().manifest_path.clone();
        match load_catalog(self.session.storage().as_ref(), &manifest_path).await {
            Ok(catalog) => {
                info!(path = %manifest_path, firmware_count = catalog.len(), "Catalog reloaded");
                Ok(self.session.catalog().replace(catalog))
            }
            Err(e) => {
                warn!(path = %manifest_path, error = %e, "Catalog reload failed, keeping previous");
                let (title, message) = e.status_message();
                self.session.show(title, &message);
                Err(e)
            }
        }
    }

    /// Run the session for a menu selection.
    ///
    /// When a flash fails after the target was strapped into its bootloader
    /// and `reset_target_on_failure` is set, the target is returned to its
    /// application before the menu comes back.
    pub async fn handle_selection(&mut self, entry: &MenuEntry) -> AppOutcome {
        info!(label = %entry.label, fw_id = %entry.id, "Menu selection");

        if entry.is_exit() {
            let result = self.session.erase_target().await;
            let action = if result.success {
                NextAction::RestartHost
            } else {
                NextAction::ReturnToMenu
            };
            return AppOutcome { result, action };
        }

        let result = self.session.run(&entry.id).await;
        if result.success {
            return AppOutcome {
                result,
                action: NextAction::RestartHost,
            };
        }

        let touched = result.failed_stage.is_some_and(SessionStage::target_touched);
        if touched
            && self.session.config().reset_target_on_failure
            && let Err(e) = self.session.recover_target().await
        {
            warn!(error = %e, "Failed to return target to its application");
        }

        AppOutcome {
            result,
            action: NextAction::ReturnToMenu,
        }
    }
}
