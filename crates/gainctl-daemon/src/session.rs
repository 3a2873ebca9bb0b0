//! One device session: the open channel, its worker and its poller.
//!
//! Swapping devices, changing the poll interval and recovering from an
//! unplugged device all go through here, so the poller is always joined
//! before the channel it reads from is closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gainctl_core::{DisplaySink, GainDevice, SuspendCounter, VolumeState, VolumeStateMachine};
use gainctl_hid::{ChannelTiming, DeviceChannel, DeviceFilter, DeviceSummary, list_devices};
use hidapi::HidApi;
use tracing::{debug, info, warn};

use crate::config::validate_interval;
use crate::poller::{PollExit, Poller, PollerHandle};
use crate::worker::{Worker, WorkerHandle};

/// Opens devices for a session.
pub trait DeviceProvider {
    /// Open `path`, or the first supported device when `path` is `None`.
    ///
    /// # Errors
    /// `DeviceNotFound` if nothing matches, a transport error if the open fails.
    fn open(&mut self, path: Option<&str>) -> gainctl_core::Result<Arc<dyn GainDevice>>;

    /// List the supported devices currently connected.
    ///
    /// # Errors
    /// Returns an error if enumeration fails.
    fn list(&mut self) -> gainctl_core::Result<Vec<DeviceSummary>>;
}

/// Opens real devices through hidapi.
pub struct HidProvider {
    api: HidApi,
    filter: DeviceFilter,
    timing: ChannelTiming,
}

impl HidProvider {
    #[must_use]
    pub fn new(api: HidApi, filter: DeviceFilter) -> Self {
        Self { api, filter, timing: ChannelTiming::default() }
    }
}

impl DeviceProvider for HidProvider {
    fn open(&mut self, path: Option<&str>) -> gainctl_core::Result<Arc<dyn GainDevice>> {
        let channel = DeviceChannel::open(&mut self.api, path, &self.filter, self.timing)?;
        Ok(Arc::new(channel))
    }

    fn list(&mut self) -> gainctl_core::Result<Vec<DeviceSummary>> {
        Ok(list_devices(&mut self.api, &self.filter)?)
    }
}

/// Snapshot of a session for the `status` command.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Path of the open device
    pub path: Option<String>,
    /// Current poll interval
    pub interval: Duration,
    /// Whether the poller is running
    pub polling: bool,
    /// Reconciliation state, if the worker answered
    pub state: Option<VolumeState>,
}

/// Owns everything tied to the open device.
pub struct Session {
    provider: Box<dyn DeviceProvider>,
    device: Option<Arc<dyn GainDevice>>,
    worker: Worker,
    suspend: SuspendCounter,
    poller: Option<PollerHandle>,
    interval: Duration,
}

impl Session {
    /// Open the first device (or `path`) and start polling it.
    ///
    /// # Errors
    /// Fails if no device can be opened or a thread cannot be spawned.
    pub fn open(
        mut provider: Box<dyn DeviceProvider>,
        path: Option<&str>,
        display: Arc<dyn DisplaySink>,
        interval: Duration,
    ) -> Result<Self> {
        let device = provider.open(path).context("Failed to open miniDSP device")?;
        let machine = VolumeStateMachine::new(device.clone(), display);
        let suspend = machine.suspend_counter();
        let worker = Worker::spawn(machine).context("Failed to spawn worker thread")?;

        let mut session =
            Self { provider, device: Some(device), worker, suspend, poller: None, interval };
        session.start_poller()?;
        Ok(session)
    }

    /// A handle for submitting work to the state machine.
    #[must_use]
    pub fn worker(&self) -> WorkerHandle {
        self.worker.handle()
    }

    /// Path of the open device, if any.
    #[must_use]
    pub fn device_path(&self) -> Option<&str> {
        self.device.as_ref().map(|device| device.path())
    }

    /// Whether the poller is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|poller| !poller.is_finished())
    }

    fn start_poller(&mut self) -> Result<()> {
        let Some(device) = &self.device else {
            return Ok(());
        };
        let poller =
            Poller::new(device.clone(), self.worker.handle(), self.suspend.clone(), self.interval)
                .spawn()
                .context("Failed to spawn poller thread")?;
        self.poller = Some(poller);
        Ok(())
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            let exit = poller.stop();
            debug!(?exit, "Poller joined");
        }
    }

    fn close_device(&mut self) {
        if let Some(device) = self.device.take() {
            device.close();
        }
    }

    /// Switch to `path`, or to the first supported device when `None`.
    ///
    /// The old channel is closed before the new one is opened. If the open
    /// fails the session is left without a device until [`Session::recover`]
    /// finds one.
    ///
    /// # Errors
    /// Fails if the new device cannot be opened or polled.
    pub fn swap_device(&mut self, path: Option<&str>) -> Result<()> {
        info!(path = path.unwrap_or("<first>"), "Switching device");
        self.stop_poller();
        self.close_device();

        let device = self.provider.open(path).context("Failed to open miniDSP device")?;
        let attached = device.clone();
        self.worker.handle().call(move |machine| machine.attach(attached));
        self.device = Some(device);

        self.start_poller()
    }

    /// Restart polling with a new interval.
    ///
    /// # Errors
    /// Fails if the interval is out of range or the poller cannot restart.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        let interval = validate_interval(interval)?;
        info!(interval_ms = interval.as_millis(), "Changing poll interval");
        self.interval = interval;

        if self.device.is_some() {
            self.stop_poller();
            self.start_poller()?;
        }
        Ok(())
    }

    /// Reap a poller that exited on its own.
    ///
    /// Returns `true` if the device was lost.
    pub fn check_poller(&mut self) -> bool {
        let finished = self.poller.as_ref().is_some_and(PollerHandle::is_finished);
        if !finished {
            return false;
        }

        match self.poller.take().map(PollerHandle::stop) {
            Some(PollExit::Disconnected(reason)) => {
                warn!(%reason, path = self.device_path().unwrap_or("?"), "Device lost");
                self.close_device();
                true
            }
            _ => false,
        }
    }

    /// Reopen the first supported device if the current one was lost.
    ///
    /// Returns `true` once a device is open again.
    pub fn recover(&mut self) -> bool {
        self.check_poller();
        if self.device.is_some() {
            return true;
        }

        match self.swap_device(None) {
            Ok(()) => {
                info!(path = self.device_path().unwrap_or("?"), "Device recovered");
                true
            }
            Err(e) => {
                debug!(error = %e, "No device yet");
                false
            }
        }
    }

    /// List supported devices.
    ///
    /// # Errors
    /// Returns an error if enumeration fails.
    pub fn list_devices(&mut self) -> Result<Vec<DeviceSummary>> {
        self.provider.list().context("Failed to enumerate devices")
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            path: self.device_path().map(str::to_string),
            interval: self.interval,
            polling: self.is_polling(),
            state: self.worker.handle().call(|machine| machine.state().clone()),
        }
    }

    /// Stop the poller, then the worker, then close the device.
    pub fn shutdown(&mut self) {
        info!("Shutting down session");
        self.stop_poller();
        self.worker.shutdown();
        self.close_device();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_poller();
        self.worker.shutdown();
        self.close_device();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use gainctl_core::testing::{FakeDevice, RecordingDisplay};
    use gainctl_core::{Error, Gain};
    use parking_lot::Mutex;

    const FAST: Duration = Duration::from_millis(2);

    type Log = Arc<Mutex<Vec<String>>>;

    /// Devices keyed by path, plus a shared open/close log.
    #[derive(Clone, Default)]
    struct FakeProvider {
        connected: Arc<Mutex<Vec<(String, Gain)>>>,
        opened: Arc<Mutex<Vec<Arc<FakeDevice>>>>,
        log: Log,
    }

    impl FakeProvider {
        fn with(paths: &[&str]) -> Self {
            let provider = Self::default();
            for path in paths {
                provider.plug(path);
            }
            provider
        }

        fn plug(&self, path: &str) {
            self.connected.lock().push((path.to_string(), Gain::from_db(-20.0)));
        }

        fn unplug(&self, path: &str) {
            self.connected.lock().retain(|(p, _)| p != path);
        }

        fn last_opened(&self) -> Arc<FakeDevice> {
            self.opened.lock().last().cloned().unwrap()
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl DeviceProvider for FakeProvider {
        fn open(&mut self, path: Option<&str>) -> gainctl_core::Result<Arc<dyn GainDevice>> {
            let (path, gain) = {
                let connected = self.connected.lock();
                let found = match path {
                    Some(path) => connected.iter().find(|(p, _)| p == path),
                    None => connected.first(),
                };
                found.cloned().ok_or(Error::DeviceNotFound)?
            };

            self.log.lock().push(format!("open {path}"));
            let device = Arc::new(FakeDevice::new(gain).named(&path, self.log.clone()));
            self.opened.lock().push(device.clone());
            Ok(device as Arc<dyn GainDevice>)
        }

        fn list(&mut self) -> gainctl_core::Result<Vec<DeviceSummary>> {
            Ok(self
                .connected
                .lock()
                .iter()
                .map(|(path, _)| DeviceSummary {
                    path: path.clone(),
                    vendor_id: 0x2752,
                    product_id: 0x0011,
                    product: None,
                })
                .collect())
        }
    }

    fn open(provider: &FakeProvider, path: Option<&str>) -> Result<Session> {
        Session::open(Box::new(provider.clone()), path, Arc::new(RecordingDisplay::default()), FAST)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_open_without_device_is_device_not_found() {
        let provider = FakeProvider::default();

        let err = open(&provider, None).err().unwrap();

        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::DeviceNotFound));
    }

    #[test]
    fn test_open_picks_first_device_and_polls() {
        let provider = FakeProvider::with(&["a", "b"]);

        let session = open(&provider, None).unwrap();

        assert_eq!(session.device_path(), Some("a"));
        assert!(session.is_polling());
        wait_for(|| session.status().state.and_then(|s| s.saved_gain).is_some());
    }

    #[test]
    fn test_swap_closes_old_before_opening_new() {
        let provider = FakeProvider::with(&["a", "b"]);
        let mut session = open(&provider, Some("a")).unwrap();
        wait_for(|| session.status().state.and_then(|s| s.saved_gain).is_some());

        session.swap_device(Some("b")).unwrap();

        assert_eq!(provider.log(), vec!["open a", "close a", "open b"]);
        assert_eq!(session.device_path(), Some("b"));
        let path = session.worker().call(|machine| machine.device().path().to_string());
        assert_eq!(path.as_deref(), Some("b"));
        assert!(session.is_polling());
    }

    #[test]
    fn test_swap_to_missing_device_leaves_session_empty() {
        let provider = FakeProvider::with(&["a"]);
        let mut session = open(&provider, None).unwrap();

        let err = session.swap_device(Some("missing")).err().unwrap();

        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::DeviceNotFound));
        assert_eq!(session.device_path(), None);
        assert!(!session.is_polling());
        assert_eq!(provider.log(), vec!["open a", "close a"]);

        // Recovery falls back to the first device.
        assert!(session.recover());
        assert_eq!(session.device_path(), Some("a"));
    }

    #[test]
    fn test_recovers_after_unplug() {
        let provider = FakeProvider::with(&["a"]);
        let mut session = open(&provider, None).unwrap();

        provider.unplug("a");
        provider.last_opened().close();
        wait_for(|| !session.is_polling());

        assert!(!session.recover());
        assert_eq!(session.device_path(), None);

        provider.plug("a");
        assert!(session.recover());
        assert!(session.is_polling());
        assert_eq!(provider.log(), vec!["open a", "close a", "open a"]);
    }

    #[test]
    fn test_check_poller_ignores_running_poller() {
        let provider = FakeProvider::with(&["a"]);
        let mut session = open(&provider, None).unwrap();

        assert!(!session.check_poller());
        assert!(session.recover());
        assert_eq!(provider.log(), vec!["open a"]);
    }

    #[test]
    fn test_poll_interval_change_restarts_poller() {
        let provider = FakeProvider::with(&["a"]);
        let mut session = open(&provider, None).unwrap();

        assert!(session.set_poll_interval(Duration::from_millis(5)).is_err());
        assert_eq!(session.status().interval, FAST);

        session.set_poll_interval(Duration::from_millis(50)).unwrap();

        assert_eq!(session.status().interval, Duration::from_millis(50));
        assert!(session.is_polling());
        assert_eq!(provider.log(), vec!["open a"]);
    }

    #[test]
    fn test_list_devices_uses_provider() {
        let provider = FakeProvider::with(&["a", "b"]);
        let mut session = open(&provider, None).unwrap();

        let paths: Vec<_> =
            session.list_devices().unwrap().into_iter().map(|device| device.path).collect();

        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_shutdown_closes_device_last() {
        let provider = FakeProvider::with(&["a"]);
        let mut session = open(&provider, None).unwrap();
        let device = provider.last_opened();

        session.shutdown();

        assert!(device.is_closed());
        assert!(!session.is_polling());
        assert!(session.status().state.is_none());
        assert_eq!(provider.log(), vec!["open a", "close a"]);
    }
}
