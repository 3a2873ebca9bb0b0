//! In-memory doubles for the device and display seams.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream crates' tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::device::{GainDevice, GainReading};
use crate::display::DisplaySink;
use crate::error::{Error, Result};
use crate::gain::Gain;
use crate::suspend::{SuspendCounter, SuspendGuard};

/// A write observed by [`FakeDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOp {
    /// Gain write, and whether a suspend scope was open at the time
    WriteGain { gain: Gain, suspended: bool },
    /// Mute write, and whether a suspend scope was open at the time
    WriteMute { muted: bool, suspended: bool },
}

/// One scripted answer to `read_gain`.
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    /// Return this reading
    Reading { gain: Gain, muted: bool },
    /// Return this reading while a suspend scope is held open until the next read
    Suspended { gain: Gain, muted: bool },
    /// Fail with this error
    Fail(Error),
}

impl ScriptedRead {
    /// Shorthand for an unmuted reading.
    #[must_use]
    pub fn db(db: f32) -> Self {
        Self::Reading { gain: Gain::from_db(db), muted: false }
    }
}

#[derive(Default)]
struct FakeInner {
    gain: Option<Gain>,
    muted: bool,
    script: Option<VecDeque<ScriptedRead>>,
    watched: Option<SuspendCounter>,
    held: Option<SuspendGuard>,
    writes: Vec<DeviceOp>,
    reads: usize,
    write_error: Option<Error>,
    closed_log: Option<Arc<Mutex<Vec<String>>>>,
}

/// A device whose register lives in memory.
///
/// Without a script, reads return whatever was last written. With a script,
/// reads pop scripted answers and report a disconnect once it runs dry.
pub struct FakeDevice {
    path: String,
    inner: Mutex<FakeInner>,
    closed: AtomicBool,
}

impl FakeDevice {
    /// A live register starting at `gain`.
    #[must_use]
    pub fn new(gain: Gain) -> Self {
        Self::with_inner("fake", FakeInner { gain: Some(gain), ..FakeInner::default() })
    }

    /// A device that answers reads from `script`.
    #[must_use]
    pub fn scripted(script: impl IntoIterator<Item = ScriptedRead>) -> Self {
        Self::with_inner(
            "fake",
            FakeInner { script: Some(script.into_iter().collect()), ..FakeInner::default() },
        )
    }

    /// Rename the device and record its `close` into a shared log.
    #[must_use]
    pub fn named(self, path: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.inner.lock().closed_log = Some(log);
        Self { path: path.to_string(), ..self }
    }

    fn with_inner(path: &str, inner: FakeInner) -> Self {
        Self { path: path.to_string(), inner: Mutex::new(inner), closed: AtomicBool::new(false) }
    }

    /// Record whether `counter` is suspended on every write.
    pub fn watch(&self, counter: SuspendCounter) {
        self.inner.lock().watched = Some(counter);
    }

    /// Make every following write fail with `error`.
    pub fn fail_writes(&self, error: Error) {
        self.inner.lock().write_error = Some(error);
    }

    /// Flip the mute bit as the remote would.
    pub fn set_muted(&self, muted: bool) {
        self.inner.lock().muted = muted;
    }

    /// Move the gain as the remote would.
    pub fn set_gain(&self, gain: Gain) {
        self.inner.lock().gain = Some(gain);
    }

    /// Current register gain.
    ///
    /// # Panics
    /// Panics for scripted devices, which have no live register.
    #[must_use]
    pub fn gain(&self) -> Gain {
        self.inner.lock().gain.expect("scripted device has no live gain")
    }

    /// Current mute bit.
    #[must_use]
    pub fn muted(&self) -> bool {
        self.inner.lock().muted
    }

    /// Writes seen so far.
    #[must_use]
    pub fn writes(&self) -> Vec<DeviceOp> {
        self.inner.lock().writes.clone()
    }

    /// Number of `read_gain` calls so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.inner.lock().reads
    }

    /// Whether `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_writable(&self, inner: &FakeInner) -> Result<bool> {
        if self.is_closed() {
            return Err(Error::TransportDisconnected("closed".into()));
        }
        if let Some(error) = &inner.write_error {
            return Err(error.clone());
        }
        Ok(inner.watched.as_ref().is_some_and(SuspendCounter::is_suspended))
    }
}

impl GainDevice for FakeDevice {
    fn read_gain(&self) -> Result<GainReading> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.reads += 1;
        inner.held = None;
        if self.is_closed() {
            return Err(Error::TransportDisconnected("closed".into()));
        }

        let (gain, muted) = match inner.script.as_mut() {
            None => (inner.gain.unwrap_or(Gain::CEILING), inner.muted),
            Some(script) => match script.pop_front() {
                Some(ScriptedRead::Reading { gain, muted }) => (gain, muted),
                Some(ScriptedRead::Suspended { gain, muted }) => {
                    let guard = inner.watched.as_ref().map(SuspendCounter::enter);
                    inner.held = guard;
                    (gain, muted)
                }
                Some(ScriptedRead::Fail(error)) => return Err(error),
                None => return Err(Error::TransportDisconnected("script exhausted".into())),
            },
        };

        let raw = vec![0x06, 0x05, 0xFF, 0xDA, gain.to_raw(), u8::from(muted)];
        Ok(GainReading { gain, muted, raw })
    }

    fn write_gain(&self, gain: Gain) -> Result<()> {
        let mut inner = self.inner.lock();
        let suspended = self.check_writable(&inner)?;
        inner.gain = Some(gain);
        inner.writes.push(DeviceOp::WriteGain { gain, suspended });
        Ok(())
    }

    fn write_mute(&self, muted: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let suspended = self.check_writable(&inner)?;
        inner.muted = muted;
        inner.writes.push(DeviceOp::WriteMute { muted, suspended });
        Ok(())
    }

    fn flush_input(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::TransportDisconnected("closed".into()));
        }
        Ok(0)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel)
            && let Some(log) = &self.inner.lock().closed_log
        {
            log.lock().push(format!("close {}", self.path));
        }
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// A display that remembers everything it was asked to show.
#[derive(Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<Gain>>,
}

impl RecordingDisplay {
    /// Levels shown so far, oldest first.
    #[must_use]
    pub fn shown(&self) -> Vec<Gain> {
        self.shown.lock().clone()
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&self, gain: Gain) {
        self.shown.lock().push(gain);
    }
}
