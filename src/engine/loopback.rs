//! In-process routing engine
//!
//! Applies the routing patch to messages pushed through crossbeam channels,
//! without touching the OS MIDI stack. Used for dry runs (`--loopback`) and
//! throughout the test suite.
//!
//! The matching [`LoopbackDevices`] plays the part of the application's I/O
//! library: it lists the engine's ports once the engine is running and lets
//! callers send and receive by handle.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::{RouteActivity, RoutingEngine};
use crate::devices::{DeviceEnumerator, DeviceHandle, DeviceInfo};
use crate::error::{BridgeError, Result};
use crate::patch::{BridgeConfig, Patch};

#[derive(Debug, Clone)]
enum Fault {
    Configure(String),
    Run(String),
}

type Sink = (Sender<Vec<u8>>, Receiver<Vec<u8>>);

/// Loopback routing engine
pub struct LoopbackEngine {
    config: Mutex<Option<BridgeConfig>>,
    active: AtomicBool,
    events_tx: Sender<(String, Vec<u8>)>,
    events_rx: Receiver<(String, Vec<u8>)>,
    quit_tx: Sender<()>,
    quit_rx: Receiver<()>,
    /// One queue per engine output port
    sinks: Mutex<HashMap<String, Sink>>,
    activity: RouteActivity,
    fault: Option<Fault>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        let (quit_tx, quit_rx) = channel::bounded(1);

        Self {
            config: Mutex::new(None),
            active: AtomicBool::new(false),
            events_tx,
            events_rx,
            quit_tx,
            quit_rx,
            sinks: Mutex::new(HashMap::new()),
            activity: RouteActivity::new(),
            fault: None,
        }
    }

    /// Engine whose `configure` fails, as if the MIDI transport were missing
    pub fn failing_configure(reason: impl Into<String>) -> Self {
        Self {
            fault: Some(Fault::Configure(reason.into())),
            ..Self::new()
        }
    }

    /// Engine that configures fine but dies as soon as it starts routing
    pub fn failing_run(reason: impl Into<String>) -> Self {
        Self {
            fault: Some(Fault::Run(reason.into())),
            ..Self::new()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.lock().is_some()
    }

    pub fn config(&self) -> Option<BridgeConfig> {
        self.config.lock().clone()
    }

    /// Push a message as if it arrived on the engine input port `port`
    pub fn send(&self, port: &str, data: &[u8]) -> Result<()> {
        let known = self
            .config
            .lock()
            .as_ref()
            .is_some_and(|c| c.input_ports.iter().any(|p| p == port));
        if !known {
            return Err(BridgeError::Device(format!("no loopback input port '{port}'")));
        }

        self.events_tx
            .send((port.to_string(), data.to_vec()))
            .map_err(|e| BridgeError::Device(e.to_string()))
    }

    /// Queue of messages written to the engine output port `port`
    pub fn receiver(&self, port: &str) -> Option<Receiver<Vec<u8>>> {
        self.sinks.lock().get(port).map(|(_, rx)| rx.clone())
    }

    fn forward(&self, patch: &Patch, source: &str, data: Vec<u8>) {
        let sinks = self.sinks.lock();
        let mut routed = false;

        for destination in patch.destinations(source) {
            routed = true;
            match sinks.get(destination) {
                Some((tx, _)) => {
                    trace!("Loopback {} >> {}: {:02X?}", source, destination, data);
                    if tx.send(data.clone()).is_ok() {
                        self.activity.record(source, destination);
                    }
                },
                None => warn!("Loopback destination '{}' has no queue", destination),
            }
        }

        if !routed {
            trace!("Loopback DROP (no rule) from {}", source);
        }
    }
}

impl RoutingEngine for LoopbackEngine {
    fn name(&self) -> &str {
        "loopback"
    }

    fn configure(&self, config: &BridgeConfig) -> Result<()> {
        if let Some(Fault::Configure(reason)) = &self.fault {
            return Err(BridgeError::EngineLaunch(reason.clone()));
        }

        let mut sinks = self.sinks.lock();
        sinks.clear();
        for port in &config.output_ports {
            sinks.insert(port.clone(), channel::unbounded());
        }

        *self.config.lock() = Some(config.clone());
        Ok(())
    }

    fn run(&self, patch: Patch) -> Result<()> {
        let client_name = self
            .config
            .lock()
            .as_ref()
            .map(|c| c.client_name.clone())
            .ok_or_else(|| BridgeError::EngineLaunch("loopback engine not configured".into()))?;

        if let Some(Fault::Run(reason)) = &self.fault {
            return Err(BridgeError::Device(reason.clone()));
        }

        self.active.store(true, Ordering::SeqCst);
        info!("Loopback engine '{}' routing {} rules", client_name, patch.len());

        loop {
            // Quit wins over pending traffic
            if self.quit_rx.try_recv().is_ok() {
                break;
            }
            channel::select! {
                recv(self.quit_rx) -> _ => break,
                recv(self.events_rx) -> event => match event {
                    Ok((source, data)) => self.forward(&patch, &source, data),
                    Err(_) => break,
                },
            }
        }

        self.active.store(false, Ordering::SeqCst);
        debug!("Loopback engine '{}' quit", client_name);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn quit(&self) {
        // bounded(1): a second quit before the first is consumed is redundant
        let _ = self.quit_tx.try_send(());
    }

    fn activity(&self) -> Option<&RouteActivity> {
        Some(&self.activity)
    }
}

/// Device list backed by a [`LoopbackEngine`]
///
/// Input devices are the engine's output ports (the application reads them),
/// output devices are the engine's input ports. Handles are unique across
/// both lists: inputs first, then outputs.
pub struct LoopbackDevices {
    engine: Arc<LoopbackEngine>,
}

impl LoopbackDevices {
    pub fn new(engine: Arc<LoopbackEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<LoopbackEngine> {
        &self.engine
    }

    fn lists(&self) -> (Vec<DeviceInfo>, Vec<DeviceInfo>) {
        // Ports only exist while the engine is routing
        let config = match self.engine.config() {
            Some(config) if self.engine.is_active() => config,
            _ => return (Vec::new(), Vec::new()),
        };

        let inputs: Vec<DeviceInfo> = config
            .output_ports
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo::new(name.clone(), DeviceHandle::new(i)))
            .collect();
        let offset = inputs.len();
        let outputs = config
            .input_ports
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo::new(name.clone(), DeviceHandle::new(offset + i)))
            .collect();

        (inputs, outputs)
    }

    fn name_of(list: &[DeviceInfo], handle: DeviceHandle) -> Result<String> {
        list.iter()
            .find(|d| d.handle == handle)
            .map(|d| d.name.clone())
            .ok_or_else(|| BridgeError::Device(format!("no loopback device {handle}")))
    }

    /// Send on an output device, as the application would
    pub fn send(&self, handle: DeviceHandle, data: &[u8]) -> Result<()> {
        let (_, outputs) = self.lists();
        let name = Self::name_of(&outputs, handle)?;
        self.engine.send(&name, data)
    }

    /// Receive queue of an input device
    pub fn receiver(&self, handle: DeviceHandle) -> Result<Receiver<Vec<u8>>> {
        let (inputs, _) = self.lists();
        let name = Self::name_of(&inputs, handle)?;
        self.engine
            .receiver(&name)
            .ok_or_else(|| BridgeError::Device(format!("no loopback queue for '{name}'")))
    }
}

impl DeviceEnumerator for LoopbackDevices {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.lists().0)
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.lists().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::build_patch;
    use crate::ports::map_ports;
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn running_engine() -> (Arc<LoopbackEngine>, thread::JoinHandle<Result<()>>) {
        let mapped = map_ports(["test"]).unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        engine
            .configure(&BridgeConfig::from_ports("Demo", &mapped))
            .unwrap();

        let runner = engine.clone();
        let patch = build_patch(&mapped);
        let handle = thread::spawn(move || runner.run(patch));
        (engine, handle)
    }

    #[test]
    fn test_applies_rule_table() {
        let (engine, handle) = running_engine();
        let system_out = engine.receiver("test_out").unwrap();
        let internal_in = engine.receiver("VMB_test_in").unwrap();

        engine.send("VMB_test_out", &[0x90, 64, 64]).unwrap();
        engine.send("test_in", &[0xB0, 7, 100]).unwrap();

        assert_eq!(system_out.recv_timeout(WAIT).unwrap(), vec![0x90, 64, 64]);
        assert_eq!(internal_in.recv_timeout(WAIT).unwrap(), vec![0xB0, 7, 100]);
        assert!(system_out.try_recv().is_err());
        assert!(internal_in.try_recv().is_err());

        engine.quit();
        handle.join().unwrap().unwrap();
        assert_eq!(engine.activity.count("VMB_test_out", "test_out"), 1);
        assert_eq!(engine.activity.count("test_in", "VMB_test_in"), 1);
    }

    #[test]
    fn test_per_port_order_preserved() {
        let (engine, handle) = running_engine();
        let system_out = engine.receiver("test_out").unwrap();

        for note in 0..100u8 {
            engine.send("VMB_test_out", &[0x90, note, 1]).unwrap();
        }
        for note in 0..100u8 {
            assert_eq!(system_out.recv_timeout(WAIT).unwrap(), vec![0x90, note, 1]);
        }

        engine.quit();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_rejects_unknown_input_port() {
        let (engine, handle) = running_engine();
        // Output ports can't be written from outside
        assert!(engine.send("test_out", &[0xF8]).is_err());
        assert!(engine.send("nope", &[0xF8]).is_err());
        engine.quit();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_devices_visible_only_while_running() {
        let mapped = map_ports(["test"]).unwrap();
        let engine = Arc::new(LoopbackEngine::new());
        let devices = LoopbackDevices::new(engine.clone());
        engine
            .configure(&BridgeConfig::from_ports("Demo", &mapped))
            .unwrap();
        assert!(devices.input_devices().unwrap().is_empty());

        let runner = engine.clone();
        let patch = build_patch(&mapped);
        let handle = thread::spawn(move || runner.run(patch));
        while !engine.is_active() {
            thread::sleep(Duration::from_millis(1));
        }

        let inputs = devices.input_devices().unwrap();
        let outputs = devices.output_devices().unwrap();
        let input_names: Vec<_> = inputs.iter().map(|d| d.name.as_str()).collect();
        let output_names: Vec<_> = outputs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(input_names, vec!["VMB_test_in", "test_out"]);
        assert_eq!(output_names, vec!["VMB_test_out", "test_in"]);
        assert!(inputs.iter().all(|i| outputs.iter().all(|o| o.handle != i.handle)));

        engine.quit();
        handle.join().unwrap().unwrap();
        assert!(devices.output_devices().unwrap().is_empty());
    }
}
