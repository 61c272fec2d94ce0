//! Routing engine on top of midir virtual ports
//!
//! Each declared port becomes a virtual ALSA sequencer / CoreMIDI port owned
//! by this process. Messages are forwarded from the input callback straight to
//! the output connections named by the patch, so per-port ordering follows the
//! order midir delivers them in.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::{RouteActivity, RoutingEngine};
use crate::error::{BridgeError, Result};
use crate::patch::{BridgeConfig, Patch};

/// midir-backed routing engine
pub struct VirtualPortEngine {
    config: Mutex<Option<BridgeConfig>>,
    active: AtomicBool,
    quit_tx: Sender<()>,
    quit_rx: Receiver<()>,
    activity: Arc<RouteActivity>,
}

impl Default for VirtualPortEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualPortEngine {
    pub fn new() -> Self {
        let (quit_tx, quit_rx) = channel::bounded(1);
        Self {
            config: Mutex::new(None),
            active: AtomicBool::new(false),
            quit_tx,
            quit_rx,
            activity: Arc::new(RouteActivity::new()),
        }
    }
}

impl RoutingEngine for VirtualPortEngine {
    fn name(&self) -> &str {
        "midir"
    }

    fn configure(&self, config: &BridgeConfig) -> Result<()> {
        if !cfg!(unix) {
            return Err(BridgeError::EngineLaunch(
                "virtual MIDI ports are not supported on this platform".into(),
            ));
        }
        if config.input_ports.is_empty() || config.output_ports.is_empty() {
            return Err(BridgeError::EngineLaunch("no ports to create".into()));
        }

        // Fail here, on the caller's thread, if the MIDI transport is missing
        midir::MidiInput::new(&config.client_name)
            .map_err(|e| BridgeError::EngineLaunch(format!("MIDI input unavailable: {e}")))?;
        midir::MidiOutput::new(&config.client_name)
            .map_err(|e| BridgeError::EngineLaunch(format!("MIDI output unavailable: {e}")))?;

        *self.config.lock() = Some(config.clone());
        Ok(())
    }

    #[cfg(unix)]
    fn run(&self, patch: Patch) -> Result<()> {
        use midir::os::unix::{VirtualInput, VirtualOutput};
        use midir::{Ignore, MidiInput, MidiOutput, MidiOutputConnection};
        use std::collections::HashMap;
        use tracing::{trace, warn};

        let config = self
            .config
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::EngineLaunch("midir engine not configured".into()))?;

        if self.quit_rx.try_recv().is_ok() {
            debug!("Quit requested before '{}' created its ports", config.client_name);
            return Ok(());
        }

        let mut outputs: HashMap<String, Mutex<MidiOutputConnection>> = HashMap::new();
        for port in &config.output_ports {
            let midi_out = MidiOutput::new(&config.client_name)?;
            let conn = midi_out.create_virtual(port).map_err(|e| {
                BridgeError::Device(format!("failed to create virtual output '{port}': {e}"))
            })?;
            debug!("Virtual output created: '{}'", port);
            outputs.insert(port.clone(), Mutex::new(conn));
        }
        let outputs = Arc::new(outputs);

        let mut inputs = Vec::with_capacity(config.input_ports.len());
        for port in &config.input_ports {
            let mut midi_in = MidiInput::new(&config.client_name)?;
            midi_in.ignore(Ignore::None);

            let source = port.clone();
            let destinations: Vec<String> = patch.destinations(port).map(String::from).collect();
            let outputs = outputs.clone();
            let activity = self.activity.clone();

            let conn = midi_in
                .create_virtual(
                    port,
                    move |_timestamp, data, _| {
                        for destination in &destinations {
                            let Some(out) = outputs.get(destination) else {
                                continue;
                            };
                            match out.lock().send(data) {
                                Ok(()) => {
                                    trace!("Route {} >> {}: {:02X?}", source, destination, data);
                                    activity.record(&source, destination);
                                },
                                Err(e) => warn!("Route {} >> {} send failed: {}", source, destination, e),
                            }
                        }
                    },
                    (),
                )
                .map_err(|e| {
                    BridgeError::Device(format!("failed to create virtual input '{port}': {e}"))
                })?;
            debug!("Virtual input created: '{}'", port);
            inputs.push(conn);
        }

        self.active.store(true, Ordering::SeqCst);
        info!(
            "Virtual MIDI device '{}' running ({} inputs, {} outputs, {} rules)",
            config.client_name,
            inputs.len(),
            outputs.len(),
            patch.len()
        );

        let _ = self.quit_rx.recv();

        // Closing the connections removes the virtual ports
        drop(inputs);
        drop(outputs);
        self.active.store(false, Ordering::SeqCst);
        debug!("Virtual MIDI device '{}' closed", config.client_name);
        Ok(())
    }

    #[cfg(not(unix))]
    fn run(&self, _patch: Patch) -> Result<()> {
        Err(BridgeError::EngineLaunch(
            "virtual MIDI ports are not supported on this platform".into(),
        ))
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn quit(&self) {
        let _ = self.quit_tx.try_send(());
    }

    fn activity(&self) -> Option<&RouteActivity> {
        Some(self.activity.as_ref())
    }
}
