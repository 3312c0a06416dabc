//! Engine session: the single object owning all pipeline state.
//!
//! Constructed once by the application; collaborators reach the engine
//! only through this handle (no process-wide singletons). `start()` wires
//! the device matcher, the suppression pipeline and the worker thread;
//! `stop()` tears everything down from any thread and leaves the shared
//! state `Inactive`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::chord;
use crate::config::EngineConfig;
use crate::cursor;
use crate::error::{EngineError, ErrorKind};
use crate::events::{EngineEvent, ObserverRegistry, ObserverToken};
use crate::matcher::{DeviceMatcher, HotplugMonitor, MatchCriterion, MatchSet};
use crate::permissions;
use crate::suppress::{EventPipeline, PipelineState, UinputSink};

/// Interval between grab-liveness checks in the worker loop.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);
/// Idle sleep when no device had events pending.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

pub struct EngineSession {
    config: Arc<RwLock<EngineConfig>>,
    state: Arc<Mutex<PipelineState>>,
    observers: Arc<ObserverRegistry>,
    match_set: Mutex<MatchSet>,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EngineSession {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            state: Arc::new(Mutex::new(PipelineState::new(Instant::now()))),
            observers: Arc::new(ObserverRegistry::new()),
            match_set: Mutex::new(MatchSet::default()),
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Register a usage-pair criterion. Only allowed before `start()`.
    pub fn add_criterion(&self, criterion: MatchCriterion) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::SessionRunning);
        }
        self.lock_match_set().add_criterion(criterion);
        Ok(())
    }

    /// Register a vendor-only criterion. Only allowed before `start()`.
    pub fn add_vendor(&self, vendor_id: u16) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::SessionRunning);
        }
        self.lock_match_set().add_vendor(vendor_id);
        Ok(())
    }

    /// Subscribe to engine notifications.
    pub fn register_observer(&self) -> (ObserverToken, Receiver<EngineEvent>) {
        self.observers.register()
    }

    pub fn unregister_observer(&self, token: ObserverToken) {
        self.observers.unregister(token);
    }

    /// Replace the configuration snapshot; takes effect on the next tick.
    pub fn set_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;
        match self.config.write() {
            Ok(mut current) => *current = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        Ok(())
    }

    pub fn config(&self) -> EngineConfig {
        self.config
            .read()
            .map(|c| *c)
            .unwrap_or_else(|e| *e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn scroll_mode_active(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.mode.is_active())
            .unwrap_or_else(|e| e.into_inner().mode.is_active())
    }

    /// Human-readable status dump for startup logging.
    pub fn current_configuration(&self) -> String {
        format!(
            "config: {:?}\n{}",
            self.config(),
            self.lock_match_set().describe()
        )
    }

    /// Open and grab matching devices, create the virtual output device
    /// and begin intercepting. A second call while running is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let match_set = self.lock_match_set().clone();
        if match_set.is_empty() {
            return Err(EngineError::NoMatchCriteria);
        }
        self.config().validate()?;
        permissions::check_input_access()?;

        let mut matcher = DeviceMatcher::new(match_set)?;
        let mut outcome = matcher.rescan();
        if matcher.open_count() == 0 {
            if !outcome.failures.is_empty() {
                let (path, source) = outcome.failures.swap_remove(0);
                return Err(EngineError::DeviceOpenFailed { path, source });
            }
            warn!("No matching device present yet; waiting for hotplug");
        }

        let (keys, axes) = matcher.capabilities();
        let sink = UinputSink::new(keys, axes).map_err(EngineError::VirtualDeviceFailed)?;
        let cursor = cursor::detect_backend();

        let monitor = match HotplugMonitor::new() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Hotplug monitoring unavailable: {e:#}");
                None
            }
        };

        broadcast_rescan(&self.observers, &outcome.attached, &outcome.detached);
        for (path, e) in &outcome.failures {
            self.observers.broadcast(EngineEvent::Error {
                kind: ErrorKind::DeviceAccess,
                message: format!("failed to grab {path:?}: {e}"),
            });
        }

        let mut pipeline = EventPipeline::new(
            self.state.clone(),
            self.config.clone(),
            self.observers.clone(),
            Box::new(sink),
            cursor,
        );

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let observers = self.observers.clone();

        let join = thread::spawn(move || {
            run_worker(&mut matcher, monitor, &mut pipeline, stop_flag, observers);
        });
        *self.lock_worker() = Some(join);
        self.running.store(true, Ordering::SeqCst);

        info!("Engine session started");
        Ok(())
    }

    /// Stop intercepting: synchronously winds down the worker, ungrabs and
    /// closes every device and resets the shared state to `Inactive`.
    /// Idempotent and callable from any thread.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }

        // The worker's shutdown already resets the state; do it here as
        // well so a dead worker cannot leave a cursor lock or stale mode
        // behind.
        {
            let mut st = self
                .state
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let st = &mut *st;
            chord::reset(&mut st.buttons, &mut st.mode);
            st.accum.reset(Instant::now());
            st.lock.deactivate();
        }

        if self.running.swap(false, Ordering::SeqCst) {
            info!("Engine session stopped");
        }
    }

    fn lock_match_set(&self) -> std::sync::MutexGuard<'_, MatchSet> {
        self.match_set.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    matcher: &mut DeviceMatcher,
    mut monitor: Option<HotplugMonitor>,
    pipeline: &mut EventPipeline,
    stop: Arc<AtomicBool>,
    observers: Arc<ObserverRegistry>,
) {
    let mut last_liveness = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        if monitor.as_mut().map(|m| m.poll_changed()).unwrap_or(false) {
            let outcome = matcher.rescan();
            broadcast_rescan(&observers, &outcome.attached, &outcome.detached);
            for (path, e) in &outcome.failures {
                observers.broadcast(EngineEvent::Error {
                    kind: ErrorKind::DeviceAccess,
                    message: format!("failed to grab {path:?}: {e}"),
                });
            }
        }

        let poll = matcher.poll(&mut |ev| pipeline.process(ev));
        for handle in &poll.detached {
            observers.broadcast(EngineEvent::DeviceDetached {
                name: handle.name.clone(),
            });
        }

        if last_liveness.elapsed() >= LIVENESS_INTERVAL {
            last_liveness = Instant::now();
            for handle in matcher.ensure_grabbed() {
                observers.broadcast(EngineEvent::Error {
                    kind: ErrorKind::Interceptor,
                    message: format!("lost exclusive grab on '{}'", handle.name),
                });
            }
        }

        if !poll.had_events {
            thread::sleep(IDLE_SLEEP);
        }
    }

    pipeline.shutdown();
    matcher.close_all();
    info!(
        "worker stopped ({} unrecognized reports seen)",
        pipeline.dropped_reports()
    );
}

fn broadcast_rescan(
    observers: &ObserverRegistry,
    attached: &[crate::matcher::DeviceHandle],
    detached: &[crate::matcher::DeviceHandle],
) {
    for handle in attached {
        observers.broadcast(EngineEvent::DeviceAttached {
            name: handle.name.clone(),
            vendor_id: handle.vendor_id,
            product_id: handle.product_id,
        });
    }
    for handle in detached {
        observers.broadcast(EngineEvent::DeviceDetached {
            name: handle.name.clone(),
        });
    }
}
