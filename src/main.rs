//! midscroll - middle-button / chord scroll-mode remapper for Linux
//!
//! Headless daemon: loads settings, registers the pointing-device match
//! criteria, starts the engine session and logs observer notifications
//! until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{Context, Result};
use midscroll::config::AppSettings;
use midscroll::hid::vendor;
use midscroll::matcher::MatchCriterion;
use midscroll::session::EngineSession;
use midscroll::{EngineError, EngineEvent};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("midscroll starting...");

    let mut settings = AppSettings::load().unwrap_or_else(|e| {
        warn!("Failed to load settings: {e:#}; using defaults");
        AppSettings::default()
    });
    let args: Vec<String> = std::env::args().skip(1).collect();
    settings.apply_cli_overrides(&args);

    let session = Arc::new(EngineSession::new(settings.engine_config()));

    // Match any generic pointer/mouse interface from the known TrackPoint
    // and mouse vendors, plus whatever the settings file adds.
    for vendor_id in [vendor::LENOVO, vendor::IBM, vendor::TI, vendor::LOGITECH] {
        session
            .add_criterion(MatchCriterion::mouse().with_vendor(vendor_id))
            .context("registering mouse criterion")?;
        session
            .add_criterion(MatchCriterion::pointer().with_vendor(vendor_id))
            .context("registering pointer criterion")?;
    }
    for vendor_id in &settings.extra_vendor_ids {
        session
            .add_vendor(*vendor_id)
            .context("registering extra vendor")?;
    }

    info!("{}", session.current_configuration());

    let (_token, events) = session.register_observer();

    match session.start() {
        Ok(()) => info!("Engine running; left+right chord or middle button enters scroll mode"),
        Err(e @ EngineError::PermissionDenied(_)) => {
            error!("{e}");
            anyhow::bail!("insufficient permissions to intercept input");
        }
        Err(e) => return Err(e).context("failed to start engine session"),
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to install signal handler")?;
    }

    while !shutdown.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => log_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("midscroll shutting down");
    session.stop();
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::DeviceAttached {
            name,
            vendor_id,
            product_id,
        } => {
            info!("Device attached: '{name}' ({vendor_id:04x}:{product_id:04x})");
        }
        EngineEvent::DeviceDetached { name } => {
            info!("Device detached: '{name}'");
        }
        EngineEvent::ScrollModeChanged { active } => {
            info!("Scroll mode {}", if *active { "on" } else { "off" });
        }
        EngineEvent::ButtonState {
            left,
            right,
            middle,
        } => {
            info!("Buttons: left={left} right={right} middle={middle}");
        }
        EngineEvent::Error { kind, message } => {
            warn!("Engine error ({kind:?}): {message}");
        }
    }
}
