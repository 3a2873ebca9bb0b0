//! Serialized worker that owns the volume state machine.
//!
//! Keyboard events and the poller's remote-change observations both end up
//! here, so `VolumeStateMachine` is only ever entered from this one thread.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use gainctl_core::{VolumeEvent, VolumeStateMachine};
use tracing::{debug, info, warn};

/// A unit of work run against the state machine.
pub type Job = Box<dyn FnOnce(&mut VolumeStateMachine) + Send>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Owns the worker thread.
pub struct Worker {
    tx: mpsc::SyncSender<Message>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker thread with exclusive ownership of `machine`.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(machine: VolumeStateMachine) -> std::io::Result<Self> {
        // One queued job at most; submitters wait for the slot.
        let (tx, rx) = mpsc::sync_channel(1);
        let thread = thread::Builder::new()
            .name("gainctl-worker".to_string())
            .spawn(move || run_worker(machine, &rx))?;

        Ok(Self { tx, thread: Some(thread) })
    }

    /// A cloneable handle for submitting work.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle { tx: self.tx.clone() }
    }

    /// Finish queued jobs and join the thread.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if thread.join().is_err() {
            warn!("Worker thread panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut machine: VolumeStateMachine, rx: &mpsc::Receiver<Message>) {
    info!("Worker started");
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => job(&mut machine),
            Message::Shutdown => break,
        }
    }
    info!("Worker stopped");
}

/// Submits jobs to the worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::SyncSender<Message>,
}

impl WorkerHandle {
    /// Queue a job, blocking while the slot is taken.
    ///
    /// Returns `false` if the worker has shut down.
    pub fn submit(&self, job: impl FnOnce(&mut VolumeStateMachine) + Send + 'static) -> bool {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            debug!("Worker gone, dropping job");
            return false;
        }
        true
    }

    /// Queue a volume event. Failures are logged and dropped.
    pub fn dispatch(&self, event: VolumeEvent) -> bool {
        self.submit(move |machine| {
            if let Err(e) = machine.handle(event) {
                warn!(?event, error = %e, "Volume event failed");
            }
        })
    }

    /// Run `f` on the worker and wait for its result.
    ///
    /// Returns `None` if the worker has shut down. Must not be called from a job.
    pub fn call<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut VolumeStateMachine) -> R + Send + 'static,
    ) -> Option<R> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let submitted = self.submit(move |machine| {
            let _ = reply_tx.send(f(machine));
        });
        if !submitted {
            return None;
        }
        reply_rx.recv().ok()
    }
}
