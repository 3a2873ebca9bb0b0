//! The reconciling volume state machine.
//!
//! Three actors move the device's gain: the local keyboard/mouse, the remote
//! control (which talks to the hardware directly), and this machine's own
//! writes. The machine decides from before/after snapshots who moved it and
//! whether the hardware needs rewriting.
//!
//! | Event | `KeyboardMuted` | `Normal` | `DigitalMuted` |
//! |---|---|---|---|
//! | `KeyboardVolume` | restore saved, unmute kb | apply delta, resync saved | unmute dig, restore saved |
//! | `KeyboardMuteToggle` | restore saved, unmute kb | save, write floor, mute kb | unmute dig, show saved |
//! | `RemoteVolume` | restore saved, unmute kb | show new level | show saved |
//! | `RemoteMuteToggle` | unmute dig, restore saved | show floor, save unless guarded | show saved |

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::device::GainDevice;
use crate::display::DisplaySink;
use crate::error::Result;
use crate::gain::Gain;
use crate::state::{MuteRegime, Observation, VolumeEvent, VolumeState};
use crate::suspend::{SuspendCounter, SuspendGuard};

/// Sole authority over hardware rewrites and display updates.
///
/// Not internally synchronized: callers must route every entry point through
/// a single serialized worker.
pub struct VolumeStateMachine {
    device: Arc<dyn GainDevice>,
    display: Arc<dyn DisplaySink>,
    suspend: SuspendCounter,
    state: VolumeState,
}

impl VolumeStateMachine {
    /// Create a machine for a freshly opened device.
    #[must_use]
    pub fn new(device: Arc<dyn GainDevice>, display: Arc<dyn DisplaySink>) -> Self {
        Self { device, display, suspend: SuspendCounter::new(), state: VolumeState::default() }
    }

    /// The suspend counter the poller should consult.
    #[must_use]
    pub fn suspend_counter(&self) -> SuspendCounter {
        self.suspend.clone()
    }

    /// Current reconciliation state.
    #[must_use]
    pub fn state(&self) -> &VolumeState {
        &self.state
    }

    /// The device this machine writes to.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn GainDevice> {
        &self.device
    }

    /// Attach a different device and start a fresh session.
    pub fn attach(&mut self, device: Arc<dyn GainDevice>) {
        info!(path = %device.path(), "Attaching device to volume state machine");
        self.device = device;
        self.reset();
    }

    /// Return to the default state, forgetting the saved gain.
    pub fn reset(&mut self) {
        debug!("Resetting volume state");
        self.state = VolumeState::default();
    }

    /// Seed the session from the poller's first valid reading.
    pub fn prime(&mut self, gain: Gain) {
        info!(%gain, "Setting initial saved gain");
        self.state.saved_gain = Some(gain);
        self.display.show(gain);
    }

    /// Open a suspend scope.
    #[must_use = "polling resumes as soon as the guard is dropped"]
    pub fn suspend_polling(&self) -> SuspendGuard {
        self.suspend.enter()
    }

    /// Fold a poll result into the flags and dispatch the remote event it implies.
    ///
    /// A reading taken before one of this machine's writes is stale by the
    /// time it arrives here and is dropped, like a read taken while suspended.
    ///
    /// Returns the event that was dispatched, if any.
    ///
    /// # Errors
    /// Returns an error if handling the derived event touched the device and failed.
    pub fn observe(&mut self, observation: Observation) -> Result<Option<VolumeEvent>> {
        let generation = self.suspend.generation();
        if observation.generation != generation {
            debug!(
                read_generation = observation.generation,
                generation,
                gain = %observation.gain,
                "Dropped poll result overtaken by a write"
            );
            return Ok(None);
        }

        let old_keyboard = self.state.keyboard_muted;
        let old_digital = self.state.digital_muted;

        self.state.keyboard_muted = observation.gain.is_muted();
        self.state.digital_muted = observation.digital_muted;
        debug!(
            keyboard_muted.old = old_keyboard,
            keyboard_muted.new = self.state.keyboard_muted,
            digital_muted.old = old_digital,
            digital_muted.new = self.state.digital_muted,
            "State update from poll"
        );

        let event = if self.state.digital_muted != old_digital {
            VolumeEvent::RemoteMuteToggle
        } else if observation.gain_changed {
            VolumeEvent::RemoteVolume(observation.gain)
        } else {
            return Ok(None);
        };

        self.state.prev_keyboard_muted = old_keyboard;
        self.state.prev_digital_muted = old_digital;
        info!(?event, gain = %observation.gain, "Remote change detected");
        self.handle(event)?;
        Ok(Some(event))
    }

    /// Run one transition.
    ///
    /// # Errors
    /// Returns an error if a device read or write failed. Flags updated before
    /// the failure stay updated; the next poll reconciles the rest.
    pub fn handle(&mut self, event: VolumeEvent) -> Result<()> {
        // Keyboard events branch on the live flags, remote events on the
        // snapshot from before the hardware moved.
        let regime =
            if event.is_keyboard() { self.state.regime() } else { self.state.prev_regime() };
        debug!(?event, ?regime, "Handling volume event");

        match event {
            VolumeEvent::KeyboardVolume(delta) => self.keyboard_volume(regime, delta),
            VolumeEvent::KeyboardMuteToggle => self.keyboard_mute(regime),
            VolumeEvent::RemoteVolume(gain) => {
                if self.state.skip_next_rc_vol {
                    self.state.skip_next_rc_vol = false;
                    debug!(%gain, "Skipped echo of keyboard mute write");
                    return Ok(());
                }
                self.remote_volume(regime, gain)
            }
            VolumeEvent::RemoteMuteToggle => {
                let result = self.remote_mute(regime);
                self.state.skip_save_only = false;
                result
            }
        }
    }

    fn keyboard_volume(&mut self, regime: MuteRegime, delta: f32) -> Result<()> {
        match regime {
            MuteRegime::KeyboardMuted => {
                // First press only unmutes.
                self.restore_saved()?;
                self.state.keyboard_muted = false;
            }
            MuteRegime::Normal => {
                self.apply_delta(delta)?;
                self.state.saved_gain = Some(self.current_gain()?);
            }
            MuteRegime::DigitalMuted => {
                self.apply_digital_unmute()?;
                self.restore_saved()?;
                self.state.skip_save_only = true;
            }
        }
        Ok(())
    }

    fn keyboard_mute(&mut self, regime: MuteRegime) -> Result<()> {
        match regime {
            MuteRegime::KeyboardMuted => {
                self.restore_saved()?;
                self.state.keyboard_muted = false;
            }
            MuteRegime::Normal => {
                self.state.saved_gain = Some(self.current_gain()?);
                self.apply_gain(Gain::FLOOR)?;
                self.state.keyboard_muted = true;
                self.state.skip_next_rc_vol = true;
            }
            MuteRegime::DigitalMuted => {
                self.apply_digital_unmute()?;
                self.show_saved();
                self.state.skip_save_only = true;
            }
        }
        Ok(())
    }

    fn remote_volume(&mut self, regime: MuteRegime, gain: Gain) -> Result<()> {
        match regime {
            MuteRegime::KeyboardMuted => {
                self.restore_saved()?;
                self.state.keyboard_muted = false;
            }
            // Hardware already moved.
            MuteRegime::Normal => self.display.show(gain),
            // Hide the transient reading while digitally muted.
            MuteRegime::DigitalMuted => self.show_saved(),
        }
        Ok(())
    }

    fn remote_mute(&mut self, regime: MuteRegime) -> Result<()> {
        match regime {
            MuteRegime::KeyboardMuted => {
                self.apply_digital_unmute()?;
                self.restore_saved()?;
            }
            MuteRegime::Normal if !self.state.skip_save_only => {
                self.display.show(Gain::FLOOR);
                self.state.saved_gain = Some(self.current_gain()?);
            }
            MuteRegime::Normal | MuteRegime::DigitalMuted => self.show_saved(),
        }
        Ok(())
    }

    /// Write a gain inside a suspend scope and show it.
    ///
    /// # Errors
    /// Returns an error if the device write fails.
    pub fn apply_gain(&self, gain: Gain) -> Result<()> {
        let _guard = self.suspend_polling();
        self.device.write_gain(gain)?;
        self.display.show(gain);
        Ok(())
    }

    /// Move the current hardware gain by `delta_db`.
    ///
    /// # Errors
    /// Returns an error if the read or the write fails.
    pub fn apply_delta(&self, delta_db: f32) -> Result<()> {
        let target = self.current_gain()?.offset(delta_db);
        self.apply_gain(target)
    }

    /// Clear the digital mute bit inside a suspend scope.
    ///
    /// # Errors
    /// Returns an error if the device write fails.
    pub fn apply_digital_unmute(&mut self) -> Result<()> {
        {
            let _guard = self.suspend_polling();
            self.device.write_mute(false)?;
        }
        self.state.digital_muted = false;
        Ok(())
    }

    /// Read the hardware gain.
    ///
    /// # Errors
    /// Returns an error if the register read fails.
    pub fn current_gain(&self) -> Result<Gain> {
        Ok(self.device.read_gain()?.gain)
    }

    fn restore_saved(&self) -> Result<()> {
        match self.state.saved_gain {
            Some(gain) => self.apply_gain(gain),
            None => {
                warn!("No saved gain to restore");
                Ok(())
            }
        }
    }

    fn show_saved(&self) {
        match self.state.saved_gain {
            Some(gain) => self.display.show(gain),
            None => warn!("No saved gain to display"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DeviceOp, FakeDevice, RecordingDisplay};
    use crate::Error;
    use assert_matches::assert_matches;

    fn db(value: f32) -> Gain {
        Gain::from_db(value)
    }

    fn machine_at(gain: f32) -> (VolumeStateMachine, Arc<FakeDevice>, Arc<RecordingDisplay>) {
        let device = Arc::new(FakeDevice::new(db(gain)));
        let display = Arc::new(RecordingDisplay::default());
        let machine = VolumeStateMachine::new(device.clone(), display.clone());
        device.watch(machine.suspend_counter());
        (machine, device, display)
    }

    /// A poll result read at the machine's current suspend generation.
    fn reading(
        machine: &VolumeStateMachine,
        gain: Gain,
        muted: bool,
        changed: bool,
    ) -> Observation {
        Observation {
            gain,
            digital_muted: muted,
            gain_changed: changed,
            generation: machine.suspend_counter().generation(),
        }
    }

    fn set_prev(machine: &mut VolumeStateMachine, keyboard: bool, digital: bool) {
        machine.state.prev_keyboard_muted = keyboard;
        machine.state.prev_digital_muted = digital;
    }

    #[test]
    fn test_keyboard_mute_from_normal_writes_floor() {
        let (mut machine, device, display) = machine_at(-20.0);

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();

        assert_eq!(device.gain(), Gain::FLOOR);
        assert_eq!(machine.state().saved_gain, Some(db(-20.0)));
        assert!(machine.state().keyboard_muted);
        assert!(machine.state().skip_next_rc_vol);
        assert_eq!(display.shown(), vec![Gain::FLOOR]);
    }

    #[test]
    fn test_echo_of_keyboard_mute_is_swallowed_once() {
        let (mut machine, device, display) = machine_at(-20.0);
        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();
        let writes_before = device.writes().len();

        machine.handle(VolumeEvent::RemoteVolume(Gain::FLOOR)).unwrap();
        assert!(!machine.state().skip_next_rc_vol);
        assert_eq!(display.shown(), vec![Gain::FLOOR]);
        assert_eq!(device.writes().len(), writes_before);

        // The next one is processed normally (KeyboardMuted by snapshot -> restore).
        set_prev(&mut machine, true, false);
        machine.handle(VolumeEvent::RemoteVolume(db(-30.0))).unwrap();
        assert_eq!(device.gain(), db(-20.0));
        assert!(!machine.state().keyboard_muted);
    }

    #[test]
    fn test_keyboard_volume_while_keyboard_muted_only_unmutes() {
        let (mut machine, device, display) = machine_at(-127.0);
        machine.state.keyboard_muted = true;
        machine.state.saved_gain = Some(db(-20.0));

        machine.handle(VolumeEvent::KeyboardVolume(0.5)).unwrap();

        assert_eq!(device.gain(), db(-20.0));
        assert!(!machine.state().keyboard_muted);
        assert_eq!(display.shown(), vec![db(-20.0)]);
    }

    #[test]
    fn test_keyboard_volume_normal_applies_delta_and_resyncs() {
        let (mut machine, device, display) = machine_at(-20.0);
        machine.state.saved_gain = Some(db(-40.0));

        machine.handle(VolumeEvent::KeyboardVolume(-0.5)).unwrap();

        assert_eq!(device.gain(), db(-20.5));
        assert_eq!(machine.state().saved_gain, Some(db(-20.5)));
        assert_eq!(display.shown(), vec![db(-20.5)]);
    }

    #[test]
    fn test_keyboard_volume_clamps_at_ceiling() {
        let (mut machine, device, _display) = machine_at(0.0);

        machine.handle(VolumeEvent::KeyboardVolume(0.5)).unwrap();

        assert_eq!(device.gain(), Gain::CEILING);
    }

    #[test]
    fn test_keyboard_volume_digital_muted_unmutes_and_restores() {
        let (mut machine, device, display) = machine_at(-35.0);
        device.set_muted(true);
        machine.state.digital_muted = true;
        machine.state.saved_gain = Some(db(-20.0));

        machine.handle(VolumeEvent::KeyboardVolume(0.5)).unwrap();

        assert!(!device.muted());
        assert!(!machine.state().digital_muted);
        assert_eq!(device.gain(), db(-20.0));
        assert_eq!(display.shown(), vec![db(-20.0)]);
        assert!(machine.state().skip_save_only);
    }

    #[test]
    fn test_keyboard_mute_while_keyboard_muted_restores() {
        let (mut machine, device, _display) = machine_at(-127.0);
        machine.state.keyboard_muted = true;
        machine.state.saved_gain = Some(db(-12.0));

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();

        assert_eq!(device.gain(), db(-12.0));
        assert!(!machine.state().keyboard_muted);
    }

    #[test]
    fn test_keyboard_mute_digital_muted_only_displays() {
        let (mut machine, device, display) = machine_at(-35.0);
        device.set_muted(true);
        machine.state.digital_muted = true;
        machine.state.saved_gain = Some(db(-20.0));

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();

        assert_eq!(device.writes(), vec![DeviceOp::WriteMute { muted: false, suspended: true }]);
        assert_eq!(device.gain(), db(-35.0));
        assert_eq!(display.shown(), vec![db(-20.0)]);
        assert!(machine.state().skip_save_only);
        assert!(!machine.state().digital_muted);
    }

    #[test]
    fn test_both_flags_behave_as_digital_muted() {
        let (mut machine, device, display) = machine_at(-127.0);
        machine.state.keyboard_muted = true;
        machine.state.digital_muted = true;
        machine.state.saved_gain = Some(db(-20.0));

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();

        assert_eq!(device.writes(), vec![DeviceOp::WriteMute { muted: false, suspended: true }]);
        assert_eq!(display.shown(), vec![db(-20.0)]);
    }

    #[test]
    fn test_remote_volume_normal_only_displays() {
        let (mut machine, device, display) = machine_at(-25.0);

        machine.handle(VolumeEvent::RemoteVolume(db(-25.0))).unwrap();

        assert!(device.writes().is_empty());
        assert_eq!(display.shown(), vec![db(-25.0)]);
    }

    #[test]
    fn test_remote_volume_uses_snapshot_not_live_flags() {
        let (mut machine, device, display) = machine_at(-25.0);
        // Live flags say keyboard-muted, snapshot says normal.
        machine.state.keyboard_muted = true;
        set_prev(&mut machine, false, false);

        machine.handle(VolumeEvent::RemoteVolume(db(-25.0))).unwrap();

        assert!(device.writes().is_empty());
        assert_eq!(display.shown(), vec![db(-25.0)]);
    }

    #[test]
    fn test_remote_volume_digital_muted_shows_saved() {
        let (mut machine, device, display) = machine_at(-25.0);
        machine.state.saved_gain = Some(db(-20.0));
        set_prev(&mut machine, false, true);

        machine.handle(VolumeEvent::RemoteVolume(db(-25.0))).unwrap();

        assert!(device.writes().is_empty());
        assert_eq!(display.shown(), vec![db(-20.0)]);
    }

    #[test]
    fn test_remote_mute_keyboard_muted_unmutes_and_restores() {
        let (mut machine, device, _display) = machine_at(-127.0);
        device.set_muted(true);
        machine.state.saved_gain = Some(db(-20.0));
        set_prev(&mut machine, true, false);

        machine.handle(VolumeEvent::RemoteMuteToggle).unwrap();

        assert!(!device.muted());
        assert_eq!(device.gain(), db(-20.0));
        assert!(!machine.state().digital_muted);
    }

    #[test]
    fn test_remote_mute_normal_shows_floor_and_saves() {
        let (mut machine, device, display) = machine_at(-18.0);
        machine.state.saved_gain = Some(db(-40.0));

        machine.handle(VolumeEvent::RemoteMuteToggle).unwrap();

        assert!(device.writes().is_empty());
        assert_eq!(display.shown(), vec![Gain::FLOOR]);
        assert_eq!(machine.state().saved_gain, Some(db(-18.0)));
    }

    #[test]
    fn test_remote_mute_normal_with_guard_only_displays() {
        let (mut machine, _device, display) = machine_at(-18.0);
        machine.state.saved_gain = Some(db(-40.0));
        machine.state.skip_save_only = true;

        machine.handle(VolumeEvent::RemoteMuteToggle).unwrap();

        assert_eq!(display.shown(), vec![db(-40.0)]);
        assert_eq!(machine.state().saved_gain, Some(db(-40.0)));
        assert!(!machine.state().skip_save_only);
    }

    #[test]
    fn test_skip_save_only_reset_after_every_remote_mute() {
        for (keyboard, digital) in [(true, false), (false, false), (false, true)] {
            let (mut machine, _device, _display) = machine_at(-20.0);
            machine.state.saved_gain = Some(db(-20.0));
            machine.state.skip_save_only = true;
            set_prev(&mut machine, keyboard, digital);

            machine.handle(VolumeEvent::RemoteMuteToggle).unwrap();

            assert!(!machine.state().skip_save_only, "regime ({keyboard}, {digital})");
        }
    }

    #[test]
    fn test_remote_mute_digital_muted_shows_saved() {
        let (mut machine, device, display) = machine_at(-35.0);
        machine.state.saved_gain = Some(db(-20.0));
        set_prev(&mut machine, false, true);

        machine.handle(VolumeEvent::RemoteMuteToggle).unwrap();

        assert_eq!(display.shown(), vec![db(-20.0)]);
        assert!(device.writes().is_empty());
        assert_eq!(machine.state().saved_gain, Some(db(-20.0)));
    }

    #[test]
    fn test_skip_save_only_reset_even_when_handler_fails() {
        let (mut machine, device, _display) = machine_at(-20.0);
        machine.state.skip_save_only = true;
        set_prev(&mut machine, true, false);
        device.fail_writes(Error::TransportBusy);

        let result = machine.handle(VolumeEvent::RemoteMuteToggle);

        assert_matches!(result, Err(Error::TransportBusy));
        assert!(!machine.state().skip_save_only);
    }

    #[test]
    fn test_writes_happen_inside_suspend_scope() {
        let (mut machine, device, _display) = machine_at(-20.0);
        machine.state.saved_gain = Some(db(-10.0));
        machine.state.digital_muted = true;

        machine.handle(VolumeEvent::KeyboardVolume(0.5)).unwrap();

        assert_eq!(
            device.writes(),
            vec![
                DeviceOp::WriteMute { muted: false, suspended: true },
                DeviceOp::WriteGain { gain: db(-10.0), suspended: true },
            ]
        );
        assert_eq!(machine.suspend_counter().depth(), 0);
    }

    #[test]
    fn test_suspend_depth_restored_after_failed_write() {
        let (machine, device, display) = machine_at(-20.0);
        device.fail_writes(Error::TransportDisconnected("unplugged".into()));

        assert!(machine.apply_gain(db(-10.0)).is_err());

        assert_eq!(machine.suspend_counter().depth(), 0);
        assert!(display.shown().is_empty());
    }

    #[test]
    fn test_restore_without_saved_gain_is_skipped() {
        let (mut machine, device, _display) = machine_at(-127.0);
        machine.state.keyboard_muted = true;

        machine.handle(VolumeEvent::KeyboardVolume(0.5)).unwrap();

        assert!(device.writes().is_empty());
        assert!(!machine.state().keyboard_muted);
    }

    #[test]
    fn test_observe_emits_remote_volume_with_snapshot() {
        let (mut machine, _device, display) = machine_at(-25.0);

        let observation = reading(&machine, db(-25.0), false, true);
        let event = machine.observe(observation).unwrap();

        assert_eq!(event, Some(VolumeEvent::RemoteVolume(db(-25.0))));
        assert!(!machine.state().prev_keyboard_muted);
        assert!(!machine.state().prev_digital_muted);
        assert_eq!(display.shown(), vec![db(-25.0)]);
    }

    #[test]
    fn test_observe_mute_flip_wins_over_gain_change() {
        let (mut machine, _device, display) = machine_at(-25.0);
        machine.state.saved_gain = Some(db(-25.0));

        let observation = reading(&machine, db(-25.0), true, true);
        let event = machine.observe(observation).unwrap();

        assert_eq!(event, Some(VolumeEvent::RemoteMuteToggle));
        assert!(machine.state().digital_muted);
        assert_eq!(display.shown(), vec![Gain::FLOOR]);
    }

    #[test]
    fn test_observe_without_change_emits_nothing() {
        let (mut machine, _device, display) = machine_at(-25.0);

        let observation = reading(&machine, db(-25.0), false, false);
        let event = machine.observe(observation).unwrap();

        assert_eq!(event, None);
        assert!(display.shown().is_empty());
    }

    #[test]
    fn test_observe_tracks_keyboard_flag_from_gain() {
        let (mut machine, _device, _display) = machine_at(-127.0);

        let observation = reading(&machine, Gain::FLOOR, false, false);
        machine.observe(observation).unwrap();

        assert!(machine.state().keyboard_muted);
    }

    #[test]
    fn test_observe_drops_reading_overtaken_by_keyboard_mute() {
        let (mut machine, device, _display) = machine_at(-20.0);
        machine.prime(db(-20.0));
        // Read by the poller just before the mute write landed.
        let stale = reading(&machine, db(-20.0), false, false);

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();
        let event = machine.observe(stale).unwrap();

        assert_eq!(event, None);
        assert!(machine.state().keyboard_muted);
        assert_eq!(machine.state().saved_gain, Some(db(-20.0)));

        machine.handle(VolumeEvent::KeyboardMuteToggle).unwrap();
        assert_eq!(device.gain(), db(-20.0));
        assert!(!machine.state().keyboard_muted);
    }

    #[test]
    fn test_attach_resets_state() {
        let (mut machine, _device, _display) = machine_at(-20.0);
        machine.prime(db(-20.0));
        machine.state.keyboard_muted = true;

        machine.attach(Arc::new(FakeDevice::new(db(-5.0))));

        assert_eq!(machine.state(), &VolumeState::default());
        assert_eq!(machine.current_gain().unwrap(), db(-5.0));
    }

    #[test]
    fn test_prime_saves_and_displays() {
        let (mut machine, _device, display) = machine_at(-20.0);

        machine.prime(db(-20.0));

        assert_eq!(machine.state().saved_gain, Some(db(-20.0)));
        assert_eq!(display.shown(), vec![db(-20.0)]);
    }
}
