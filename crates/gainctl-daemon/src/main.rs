//! Gainctl Daemon - miniDSP gain control service.
//!
//! Opens the miniDSP, polls it for remote-control changes, and applies
//! volume commands read from stdin through the same serialized path a
//! keyboard hook would use.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gainctl_core::Command;
use hidapi::HidApi;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod hotkeys;
mod osd;
mod poller;
mod session;
mod signals;
mod worker;

use hotkeys::{HotkeyGate, HotkeyHandle};
use osd::LogOsd;
use session::{HidProvider, Session};

/// How often to look for a replacement after the device disappears.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration first: it carries the default log level
    let config = config::load_config()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.daemon.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gainctl daemon");

    let filter = config.device.filter()?;
    let api = HidApi::new().context("Failed to initialize hidapi")?;
    let provider = Box::new(HidProvider::new(api, filter));

    let mut session = Session::open(
        provider,
        config.device.path.as_deref(),
        Arc::new(LogOsd::new()),
        config.polling.interval(),
    )?;
    info!(path = session.device_path().unwrap_or("?"), "Device session started");

    let hotkeys = HotkeyHandle::new(session.worker(), Arc::new(HotkeyGate::new(config.hotkeys)));

    // Set up signal handling
    let mut shutdown_rx = signals::setup_signal_handlers()?;

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut commands_open = true;
    let mut recovery = tokio::time::interval(RECOVERY_INTERVAL);

    info!("Daemon running. Type commands on stdin, Ctrl+C to exit.");

    // Main event loop
    loop {
        tokio::select! {
            signal = shutdown_rx.recv() => {
                match signal {
                    Some(signal) => info!(%signal, "Shutdown signal received"),
                    None => warn!("Signal handlers gone, shutting down"),
                }
                break;
            }

            line = commands.next_line(), if commands_open => {
                match line {
                    Ok(Some(line)) => {
                        // Device swaps and status queries block on the worker and the poller.
                        let flow =
                            tokio::task::block_in_place(|| run_line(&line, &mut session, &hotkeys));
                        if flow.is_break() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, no more commands");
                        commands_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read command");
                        commands_open = false;
                    }
                }
            }

            _ = recovery.tick() => {
                tokio::task::block_in_place(|| session.recover());
            }
        }
    }

    tokio::task::block_in_place(|| session.shutdown());
    info!("Gainctl daemon stopped");
    Ok(())
}

/// Parse and run one command line.
fn run_line(line: &str, session: &mut Session, hotkeys: &HotkeyHandle) -> ControlFlow<()> {
    if line.trim().is_empty() {
        return ControlFlow::Continue(());
    }

    match line.parse::<Command>() {
        Ok(command) => {
            debug!(?command, "Handling command");
            run_command(command, session, hotkeys)
        }
        Err(e) => {
            warn!(error = %e, "Ignoring command");
            ControlFlow::Continue(())
        }
    }
}

fn run_command(command: Command, session: &mut Session, hotkeys: &HotkeyHandle) -> ControlFlow<()> {
    match command {
        Command::VolumeUp => hotkeys.on_volume_up(),
        Command::VolumeDown => hotkeys.on_volume_down(),
        Command::ToggleMute => hotkeys.on_mute_toggle(),
        Command::Key { family, action } => {
            if !hotkeys.on_key(family, action) {
                debug!(%family, ?action, "Key not consumed");
            }
        }
        Command::Wheel { delta } => {
            if !hotkeys.on_wheel(delta) {
                debug!(delta, "Wheel not consumed");
            }
        }
        Command::Pause => hotkeys.gate().set_paused(true),
        Command::Resume => hotkeys.gate().set_paused(false),
        Command::SetHotkeys { family, enabled } => hotkeys.gate().set_enabled(family, enabled),
        Command::ListDevices => match session.list_devices() {
            Ok(devices) if devices.is_empty() => info!("No supported devices connected"),
            Ok(devices) => {
                for device in devices {
                    info!(
                        path = %device.path,
                        vendor_id = format_args!("{:04x}", device.vendor_id),
                        product_id = format_args!("{:04x}", device.product_id),
                        product = device.product.as_deref().unwrap_or("unknown"),
                        active = session.device_path() == Some(device.path.as_str()),
                        "Device"
                    );
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Failed to list devices"),
        },
        Command::UseDevice { path } => {
            if let Err(e) = session.swap_device(Some(&path)) {
                error!(%path, error = %format!("{e:#}"), "Failed to switch device");
            }
        }
        Command::SetPollInterval { interval } => {
            if let Err(e) = session.set_poll_interval(interval) {
                warn!(error = %format!("{e:#}"), "Poll interval not changed");
            }
        }
        Command::Status => {
            let status = session.status();
            let state = status.state.unwrap_or_default();
            info!(
                path = status.path.as_deref().unwrap_or("none"),
                interval_ms = status.interval.as_millis(),
                polling = status.polling,
                paused = hotkeys.gate().is_paused(),
                keyboard_muted = state.keyboard_muted,
                digital_muted = state.digital_muted,
                saved_gain = ?state.saved_gain,
                "Status"
            );
        }
        Command::Shutdown => {
            info!("Shutdown requested");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
