//! Entry points for keyboard and mouse hooks.
//!
//! The hook layer itself lives outside the daemon; it calls into a
//! [`HotkeyHandle`] from its own thread and gets back whether the input was
//! consumed. Everything that touches the device is forwarded to the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gainctl_core::{Gain, HotkeyAction, HotkeyFamily, VolumeEvent};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::HotkeysConfig;
use crate::worker::WorkerHandle;

/// Scroll delta of one wheel notch.
pub const WHEEL_DELTA: i32 = 120;

/// Pause switch and per-family enable flags.
#[derive(Debug)]
pub struct HotkeyGate {
    paused: AtomicBool,
    media: AtomicBool,
    alt: AtomicBool,
    shift_mouse: AtomicBool,
}

impl HotkeyGate {
    #[must_use]
    pub fn new(config: HotkeysConfig) -> Self {
        Self {
            paused: AtomicBool::new(false),
            media: AtomicBool::new(config.enabled(HotkeyFamily::Media)),
            alt: AtomicBool::new(config.enabled(HotkeyFamily::Alt)),
            shift_mouse: AtomicBool::new(config.enabled(HotkeyFamily::ShiftMouse)),
        }
    }

    fn flag(&self, family: HotkeyFamily) -> &AtomicBool {
        match family {
            HotkeyFamily::Media => &self.media,
            HotkeyFamily::Alt => &self.alt,
            HotkeyFamily::ShiftMouse => &self.shift_mouse,
        }
    }

    pub fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::AcqRel) != paused {
            info!(paused, "Hotkeys {}", if paused { "paused" } else { "resumed" });
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, family: HotkeyFamily, enabled: bool) {
        self.flag(family).store(enabled, Ordering::Release);
        info!(%family, enabled, "Hotkey family updated");
    }

    #[must_use]
    pub fn is_enabled(&self, family: HotkeyFamily) -> bool {
        self.flag(family).load(Ordering::Acquire)
    }

    /// Whether input from `family` should be acted on right now.
    fn accepts(&self, family: HotkeyFamily) -> bool {
        !self.is_paused() && self.is_enabled(family)
    }
}

/// Forwards hook input to the worker. Cheap to clone.
#[derive(Clone)]
pub struct HotkeyHandle {
    worker: WorkerHandle,
    gate: Arc<HotkeyGate>,
    wheel_remainder: Arc<Mutex<i32>>,
}

impl HotkeyHandle {
    #[must_use]
    pub fn new(worker: WorkerHandle, gate: Arc<HotkeyGate>) -> Self {
        Self { worker, gate, wheel_remainder: Arc::new(Mutex::new(0)) }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<HotkeyGate> {
        &self.gate
    }

    /// Raise the gain by one step.
    pub fn on_volume_up(&self) {
        self.dispatch(VolumeEvent::KeyboardVolume(Gain::STEP_DB));
    }

    /// Lower the gain by one step.
    pub fn on_volume_down(&self) {
        self.dispatch(VolumeEvent::KeyboardVolume(-Gain::STEP_DB));
    }

    /// Toggle keyboard mute.
    pub fn on_mute_toggle(&self) {
        self.dispatch(VolumeEvent::KeyboardMuteToggle);
    }

    /// Handle a key from `family`. Returns `true` if the key was consumed.
    ///
    /// Keys from a disabled family, or any key while paused, pass through.
    pub fn on_key(&self, family: HotkeyFamily, action: HotkeyAction) -> bool {
        if !self.gate.accepts(family) {
            debug!(%family, ?action, "Hotkey passed through");
            return false;
        }
        match action {
            HotkeyAction::VolumeUp => self.on_volume_up(),
            HotkeyAction::VolumeDown => self.on_volume_down(),
            HotkeyAction::ToggleMute => self.on_mute_toggle(),
        }
        true
    }

    /// Handle a Shift + wheel scroll. Returns `true` if it was consumed.
    ///
    /// Partial notches carry over to the next scroll.
    pub fn on_wheel(&self, delta: i32) -> bool {
        if !self.gate.accepts(HotkeyFamily::ShiftMouse) {
            return false;
        }

        let notches = {
            let mut remainder = self.wheel_remainder.lock();
            let total = remainder.saturating_add(delta);
            *remainder = total % WHEEL_DELTA;
            total / WHEEL_DELTA
        };

        if notches != 0 {
            #[allow(clippy::cast_precision_loss)]
            let delta_db = notches as f32 * Gain::STEP_DB;
            self.dispatch(VolumeEvent::KeyboardVolume(delta_db));
        }
        true
    }

    fn dispatch(&self, event: VolumeEvent) {
        if self.gate.is_paused() {
            debug!(?event, "Hotkeys paused, ignoring");
            return;
        }
        self.worker.dispatch(event);
    }
}
