//! Runtime editing of settings and device selection.
//!
//! Edits land in [`ControlState`] immediately so the loops pick them up on
//! their next tick. The file is written when an edit completes.

use crate::config::{ConfigError, ConfigStore, PerModeConfig};
use crate::registry::{BindingError, DeviceIndex, Signal};
use crate::state::ControlState;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SettingsEditor {
    state: Arc<ControlState>,
    store: Arc<dyn ConfigStore>,
}

impl SettingsEditor {
    pub fn new(state: Arc<ControlState>, store: Arc<dyn ConfigStore>) -> Self {
        Self { state, store }
    }

    /// Apply an in-progress edit without persisting it.
    pub fn edit(&self, f: impl FnOnce(&mut PerModeConfig)) {
        self.state.edit_config(f);
    }

    /// Apply a completed edit and persist the result.
    pub fn commit(&self, f: impl FnOnce(&mut PerModeConfig)) -> Result<(), ConfigError> {
        self.edit(f);
        self.save()
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let snapshot = self.state.config();
        self.store.save(&snapshot)
    }

    /// A continuous control (e.g. a range slider) is being dragged; idle motion
    /// holds still so the user can feel the bound being set.
    pub fn begin_drag(&self) {
        self.state.suspend_idle(true);
    }

    pub fn end_drag(&self) -> Result<(), ConfigError> {
        self.state.suspend_idle(false);
        self.save()
    }

    pub fn select_device(&self, signal: Signal, index: DeviceIndex) -> Result<(), BindingError> {
        self.state.edit_registry(|r| r.select(signal, index))?;
        info!(%signal, device = index, "device selected");
        Ok(())
    }

    pub fn unbind(&self, signal: Signal) {
        self.state.edit_registry(|r| r.unbind(signal));
        info!(%signal, "device unbound");
    }
}
