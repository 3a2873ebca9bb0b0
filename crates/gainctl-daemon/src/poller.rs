//! Background poller that watches the device for remote-control changes.
//!
//! The remote talks to the hardware directly, so the only way to notice it is
//! to keep reading the gain register. The poller runs on its own thread,
//! classifies each reading as noise, our own write, or a real change, and
//! hands real changes to the worker.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gainctl_core::{Error, Gain, GainDevice, GainReading, Observation, SuspendCounter};
use tracing::{debug, info, warn};

use crate::worker::WorkerHandle;

/// Why a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollExit {
    /// Stop was requested
    Stopped,
    /// A read failed in a way that means the device is gone
    Disconnected(String),
}

/// What the poller remembers between cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSnapshot {
    /// Gain from the previous cycle
    pub previous_gain: Option<Gain>,
    /// Raw response from the previous cycle
    pub previous_raw: Vec<u8>,
}

impl PollSnapshot {
    fn update(&mut self, reading: &GainReading) {
        self.previous_gain = Some(reading.gain);
        self.previous_raw.clone_from(&reading.raw);
    }
}

/// The poll loop and its state. Consumed by [`Poller::spawn`].
pub struct Poller {
    device: Arc<dyn GainDevice>,
    worker: WorkerHandle,
    suspend: SuspendCounter,
    interval: Duration,
    snapshot: PollSnapshot,
}

impl Poller {
    /// Create a poller for one device session.
    #[must_use]
    pub fn new(
        device: Arc<dyn GainDevice>,
        worker: WorkerHandle,
        suspend: SuspendCounter,
        interval: Duration,
    ) -> Self {
        Self { device, worker, suspend, interval, snapshot: PollSnapshot::default() }
    }

    /// Start polling on a dedicated thread.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<PollerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("gainctl-poller".to_string())
            .spawn(move || self.run(&stop_rx))?;

        Ok(PollerHandle { stop_tx: Some(stop_tx), thread: Some(thread) })
    }

    fn run(mut self, stop: &mpsc::Receiver<()>) -> PollExit {
        info!(
            path = %self.device.path(),
            interval_ms = self.interval.as_millis(),
            "Poll loop started"
        );

        let exit = match self.prime(stop) {
            Ok(()) => self.steady(stop),
            Err(exit) => exit,
        };

        match &exit {
            PollExit::Stopped => info!("Poll loop stopped"),
            PollExit::Disconnected(reason) => warn!(%reason, "Poll loop exited, device lost"),
        }
        exit
    }

    /// Sleep one interval. Returns `true` if stop was requested.
    fn wait(&self, stop: &mpsc::Receiver<()>) -> bool {
        match stop.recv_timeout(self.interval) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Drain stale reports and wait for the first valid reading.
    fn prime(&mut self, stop: &mpsc::Receiver<()>) -> Result<(), PollExit> {
        match self.device.flush_input() {
            Ok(flushed) => debug!(flushed, "Flushed pending input reports"),
            Err(e) => debug!(error = %e, "Flush stopped on error"),
        }

        loop {
            if self.wait(stop) {
                return Err(PollExit::Stopped);
            }

            match self.device.read_gain() {
                Ok(reading) if reading.gain.is_zero() => {
                    debug!("Skipped noise report during priming (0.0 dB)");
                }
                Ok(reading) => {
                    debug!(gain = %reading.gain, raw = ?reading.raw, "Initial valid gain read");
                    self.snapshot.update(&reading);
                    let gain = reading.gain;
                    if !self.worker.submit(move |machine| machine.prime(gain)) {
                        return Err(PollExit::Stopped);
                    }
                    return Ok(());
                }
                // No valid initial value yet, so keep trying.
                Err(Error::ReadTimeout) => warn!("Initial gain read timed out"),
                Err(e) => return Err(PollExit::Disconnected(e.to_string())),
            }
        }
    }

    fn steady(&mut self, stop: &mpsc::Receiver<()>) -> PollExit {
        loop {
            if self.wait(stop) {
                return PollExit::Stopped;
            }
            if let Err(exit) = self.cycle() {
                return exit;
            }
        }
    }

    /// One steady-state read and classification.
    fn cycle(&mut self) -> Result<(), PollExit> {
        let generation = self.suspend.generation();
        let reading = match self.device.read_gain() {
            Ok(reading) => reading,
            Err(Error::ReadTimeout) => {
                warn!("Gain read timed out");
                return Ok(());
            }
            Err(e) => return Err(PollExit::Disconnected(e.to_string())),
        };

        if reading.gain.is_zero() {
            debug!("Skipped noise report (0.0 dB)");
            return Ok(());
        }

        if self.suspend.is_suspended() || self.suspend.generation() != generation {
            // Our own write; resync so the next cycle compares against it.
            debug!(
                depth = self.suspend.depth(),
                generation,
                gain = %reading.gain,
                "Ignored poll while suspended"
            );
            self.snapshot.update(&reading);
            return Ok(());
        }

        let observation = Observation {
            gain: reading.gain,
            digital_muted: reading.muted,
            gain_changed: self.snapshot.previous_gain != Some(reading.gain),
            generation,
        };
        let previous_raw = std::mem::take(&mut self.snapshot.previous_raw);
        debug!(?observation, prev_raw = ?previous_raw, raw = ?reading.raw, "Poll cycle");

        let submitted = self.worker.submit(move |machine| {
            if let Err(e) = machine.observe(observation) {
                warn!(error = %e, "Failed to reconcile remote change");
            }
        });
        if !submitted {
            return Err(PollExit::Stopped);
        }

        self.snapshot.update(&reading);
        Ok(())
    }
}

/// Controls a running poller.
pub struct PollerHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<PollExit>>,
}

impl PollerHandle {
    /// Whether the loop has already ended on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the loop to stop and wait for it.
    pub fn stop(mut self) -> PollExit {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> PollExit {
        // Dropping the sender wakes the loop out of its sleep.
        self.stop_tx.take();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                warn!("Poller thread panicked");
                PollExit::Disconnected("poller panicked".to_string())
            }),
            None => PollExit::Stopped,
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop_and_join();
        }
    }
}
