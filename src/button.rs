//! Boot button gestures.
//!
//! The button is sampled every [`TICK_MS`](crate::board::TICK_MS). Gestures
//! are recognized on release:
//! - held for more than ten seconds: factory reset
//! - three presses within two seconds: toggle the boot mode
//!
//! Presses shorter than a few samples are contact bounce and do not count.
use crate::config::{BootMode, Config, ConfigStorage, StorageError};

/// Samples held before a release counts as a long press (10 s)
pub const LONG_PRESS_SAMPLES: u32 = 1000;

/// Samples held before a release counts as a press at all
pub const MIN_PRESS_SAMPLES: u32 = 3;

pub const PRESS_WINDOW_MS: u32 = 2000;

pub const PRESSES_TO_TOGGLE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    FactoryReset,
    ToggleBootMode,
}

#[derive(Debug, Clone)]
pub struct ButtonTracker {
    pressed: bool,
    held: u32,
    window_start_ms: u32,
    presses: u32,
}

impl ButtonTracker {
    pub const fn new(now_ms: u32) -> Self {
        Self {
            pressed: false,
            held: 0,
            window_start_ms: now_ms,
            presses: 0,
        }
    }

    /// Feed one sample taken at `now_ms`.
    pub fn sample(&mut self, pressed: bool, now_ms: u32) -> Option<ButtonAction> {
        if pressed == self.pressed {
            if pressed {
                self.held = self.held.saturating_add(1);
            }
            return None;
        }

        if now_ms.wrapping_sub(self.window_start_ms) > PRESS_WINDOW_MS {
            // Window expired: start a new one on this press
            self.presses = 0;
            if pressed {
                self.window_start_ms = now_ms;
            }
        }

        let mut action = None;
        if !pressed {
            if self.held > LONG_PRESS_SAMPLES {
                action = Some(ButtonAction::FactoryReset);
            } else if self.held > MIN_PRESS_SAMPLES {
                self.presses += 1;
                if self.presses == PRESSES_TO_TOGGLE {
                    action = Some(ButtonAction::ToggleBootMode);
                }
            }
        }

        self.held = 0;
        self.pressed = pressed;
        action
    }
}

/// Persist the effect of `action`; the caller restarts afterwards.
///
/// The toggle is relative to the mode the device is running in, which can
/// differ from the stored one when Config mode was forced.
pub fn apply_action<S: ConfigStorage>(
    action: ButtonAction,
    running: BootMode,
    config: &mut Config,
    storage: &mut S,
) -> Result<(), StorageError> {
    match action {
        ButtonAction::FactoryReset => {
            log::warn!("Button: factory reset");
            config.reset();
        }
        ButtonAction::ToggleBootMode => {
            log::info!("Button: switching to {:?} mode", running.toggled());
            config.set_boot_mode(running.toggled());
        }
    }
    config.save(storage)
}
