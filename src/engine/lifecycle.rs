//! Routing engine lifecycle
//!
//! Only one routing engine may run per process. The slot below is checked and
//! claimed under a single lock, so concurrent `start` calls can't both win.
//!
//! Errors raised by the engine after its thread has started can't be handed
//! back to the caller, who already holds a running engine. They are logged and
//! kept for [`RunningEngine::failure`].

use parking_lot::{const_mutex, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::RoutingEngine;
use crate::error::{BridgeError, Result};
use crate::patch::{BridgeConfig, Patch};

/// How long `stop` waits for the routing thread before detaching it.
///
/// A detached thread keeps the engine slot until it exits, so no new engine
/// can start while the old one may still own its ports.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

const ROUTING_THREAD_NAME: &str = "vmidi-routing";

#[derive(Debug)]
struct SlotHolder {
    generation: u64,
    client_name: String,
}

/// Routing thread exit state shared between the thread and `stop`
#[derive(Debug, Default)]
struct ThreadExit {
    finished: bool,
    detached: bool,
}

/// Marks the routing thread finished when dropped, unwinding included. A
/// detached thread releases its own slot here.
struct ExitGuard {
    exit: Arc<Mutex<ThreadExit>>,
    generation: u64,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut exit = self.exit.lock();
        exit.finished = true;
        if exit.detached {
            release(self.generation);
            debug!("Detached routing thread released the engine slot");
        }
    }
}

static ENGINE_SLOT: Mutex<Option<SlotHolder>> = const_mutex(None);
static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Whether some bridge currently holds the process-wide engine slot
pub fn is_engaged() -> bool {
    ENGINE_SLOT.lock().is_some()
}

/// Client name of the bridge holding the engine slot
pub fn active_client_name() -> Option<String> {
    ENGINE_SLOT.lock().as_ref().map(|h| h.client_name.clone())
}

fn already_active(config: &BridgeConfig, active_name: &str) -> BridgeError {
    BridgeError::AlreadyActive {
        requested_name: config.client_name.clone(),
        requested_ports: config.all_ports(),
        active_name: active_name.to_string(),
    }
}

/// Claim the engine slot, configure the engine and launch it on a background
/// thread. Returns as soon as the thread is spawned.
pub fn start(
    engine: Arc<dyn RoutingEngine>,
    config: BridgeConfig,
    patch: Patch,
) -> Result<RunningEngine> {
    let mut slot = ENGINE_SLOT.lock();

    if let Some(holder) = slot.as_ref() {
        warn!(
            "Refusing to start '{}': engine already active for '{}'",
            config.client_name, holder.client_name
        );
        return Err(already_active(&config, &holder.client_name));
    }
    if engine.is_active() {
        warn!(
            "Refusing to start '{}': {} engine is already running",
            config.client_name,
            engine.name()
        );
        return Err(already_active(&config, engine.name()));
    }

    engine.configure(&config).map_err(|e| match e {
        BridgeError::EngineLaunch(_) => e,
        other => BridgeError::EngineLaunch(other.to_string()),
    })?;
    debug!(
        "Configured {} engine '{}': in={:?} out={:?}",
        engine.name(),
        config.client_name,
        config.input_ports,
        config.output_ports
    );

    let generation = GENERATION.fetch_add(1, Ordering::SeqCst);
    let failure = Arc::new(Mutex::new(None));
    let exit = Arc::new(Mutex::new(ThreadExit::default()));
    let thread = {
        let engine = engine.clone();
        let failure = failure.clone();
        let exit = exit.clone();
        let client_name = config.client_name.clone();

        thread::Builder::new()
            .name(ROUTING_THREAD_NAME.to_string())
            .spawn(move || {
                let _exit = ExitGuard { exit, generation };
                debug!("Routing thread started for '{}'", client_name);
                match engine.run(patch) {
                    Ok(()) => debug!("Routing engine '{}' exited", client_name),
                    Err(e) => {
                        error!("Routing engine '{}' failed: {}", client_name, e);
                        *failure.lock() = Some(e.to_string());
                    },
                }
            })
            .map_err(|e| BridgeError::EngineLaunch(format!("failed to spawn routing thread: {e}")))?
    };

    *slot = Some(SlotHolder {
        generation,
        client_name: config.client_name.clone(),
    });

    info!(
        "Routing engine '{}' started ({} backend)",
        config.client_name,
        engine.name()
    );

    Ok(RunningEngine {
        engine,
        generation,
        client_name: config.client_name,
        thread: Some(thread),
        failure,
        exit,
        stopped: false,
    })
}

fn release(generation: u64) {
    let mut slot = ENGINE_SLOT.lock();
    if slot.as_ref().map(|h| h.generation) == Some(generation) {
        *slot = None;
    }
}

/// Handle to the engine launched by [`start`]. Stops the engine on drop.
pub struct RunningEngine {
    engine: Arc<dyn RoutingEngine>,
    generation: u64,
    client_name: String,
    thread: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
    exit: Arc<Mutex<ThreadExit>>,
    stopped: bool,
}

impl RunningEngine {
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// True until `stop`, or until the routing thread exits on its own
    pub fn is_running(&self) -> bool {
        !self.stopped && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Error reported by the routing thread after launch, if any
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn engine(&self) -> &Arc<dyn RoutingEngine> {
        &self.engine
    }

    /// Ask the engine to quit and release the engine slot. Calling it again is
    /// a no-op.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        debug!("Stopping routing engine '{}'", self.client_name);
        self.engine.quit();

        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + STOP_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(2));
            }

            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("Routing thread for '{}' panicked", self.client_name);
                    self.failure
                        .lock()
                        .get_or_insert_with(|| "routing thread panicked".to_string());
                }
            } else {
                let mut exit = self.exit.lock();
                if !exit.finished {
                    exit.detached = true;
                    warn!(
                        "Routing thread for '{}' still busy after {:?}, detaching; \
                         the engine slot stays claimed until it exits",
                        self.client_name, STOP_GRACE
                    );
                    return;
                }
            }
        }

        release(self.generation);
        info!("Routing engine '{}' stopped", self.client_name);
    }
}

impl Drop for RunningEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RunningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningEngine")
            .field("client_name", &self.client_name)
            .field("backend", &self.engine.name())
            .field("generation", &self.generation)
            .field("stopped", &self.stopped)
            .finish()
    }
}
