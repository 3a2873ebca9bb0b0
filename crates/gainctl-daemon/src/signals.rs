//! Shutdown signals.

use std::fmt;

use anyhow::Result;
use tokio::sync::mpsc;

/// The signal that asked the daemon to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM, e.g. from the service manager
    Terminate,
    /// SIGINT / Ctrl+C
    Interrupt,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
        })
    }
}

/// Forward SIGTERM and Ctrl+C into a channel.
///
/// The first signal wins; the main loop stops reading after it.
///
/// # Errors
/// Returns an error if the SIGTERM handler cannot be installed.
pub fn setup_signal_handlers() -> Result<mpsc::Receiver<ShutdownSignal>> {
    let (tx, rx) = mpsc::channel(2);

    #[cfg(unix)]
    {
        use anyhow::Context;
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let tx = tx.clone();
        tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                let _ = tx.send(ShutdownSignal::Terminate).await;
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(ShutdownSignal::Interrupt).await;
        }
    });

    Ok(rx)
}
