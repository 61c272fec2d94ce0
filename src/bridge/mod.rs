//! Virtual MIDI device
//!
//! Exposes a set of named bidirectional ports to both the application's MIDI
//! I/O library and the system MIDI fabric, and relays messages between them.
//!
//! ```no_run
//! use vmidi_bridge::VirtualMidiDevice;
//!
//! let device = VirtualMidiDevice::open(["test"], Some("Demo"))?;
//! let test = device.port("test")?;
//! // receive on test.input, send on test.output with the I/O library
//! # Ok::<(), vmidi_bridge::BridgeError>(())
//! ```
//!
//! Only one device may be active per process. Errors inside the background
//! routing thread after a successful start can't be returned to the caller;
//! they are logged and available from [`VirtualMidiDevice::engine_failure`].

use std::sync::Arc;
use tracing::{debug, info};

use crate::devices::{DeviceEnumerator, MidirDevices};
use crate::engine::{lifecycle, RouteStats, RoutingEngine, RunningEngine, VirtualPortEngine};
use crate::error::{BridgeError, Result};
use crate::patch::{build_patch, BridgeConfig, Patch, DEFAULT_CLIENT_NAME};
use crate::ports::{map_ports, MappedPort, PortList};
use crate::resolver::{self, PortHandleTable, PortHandles, ResolvePolicy};

/// Builder for [`VirtualMidiDevice`]
pub struct BridgeBuilder {
    ports: PortList,
    name: Option<String>,
    policy: ResolvePolicy,
    engine: Option<Arc<dyn RoutingEngine>>,
    devices: Option<Arc<dyn DeviceEnumerator>>,
}

impl BridgeBuilder {
    fn new(ports: PortList) -> Self {
        Self {
            ports,
            name: None,
            policy: ResolvePolicy::default(),
            engine: None,
            devices: None,
        }
    }

    /// Device display name (the routing engine's client name)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn resolve_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Routing engine to use instead of midir virtual ports
    pub fn engine(mut self, engine: Arc<dyn RoutingEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Device list to resolve handles against instead of midir's
    pub fn devices(mut self, devices: Arc<dyn DeviceEnumerator>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Map ports, build the patch and launch the routing engine.
    ///
    /// The returned device is running but has no handles yet; call
    /// [`VirtualMidiDevice::resolve`].
    pub fn start(self) -> Result<VirtualMidiDevice> {
        let mapping = map_ports(self.ports)?;
        let name = self.name.unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string());
        let patch = build_patch(&mapping);
        let config = BridgeConfig::from_ports(name.clone(), &mapping);

        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(VirtualPortEngine::new()));
        let devices = self
            .devices
            .unwrap_or_else(|| Arc::new(MidirDevices::new(format!("{name} scanner"))));

        for rule in patch.rules() {
            debug!("Patch rule: {}", rule);
        }

        // With a bridge already running, let the lifecycle report AlreadyActive
        if !lifecycle::is_engaged() {
            resolver::check_collisions(&mapping, devices.as_ref())?;
        }

        let running = lifecycle::start(engine, config, patch.clone())?;

        Ok(VirtualMidiDevice {
            name,
            mapping,
            patch,
            devices,
            policy: self.policy,
            running,
            table: None,
        })
    }

    /// Start and resolve in one go.
    ///
    /// If resolution fails the half-started device is dropped, which stops its
    /// engine. Use [`start`](Self::start) and
    /// [`resolve`](VirtualMidiDevice::resolve) to retry resolution instead.
    pub fn open(self) -> Result<VirtualMidiDevice> {
        let mut device = self.start()?;
        device.resolve()?;
        Ok(device)
    }
}

/// A running virtual MIDI device
pub struct VirtualMidiDevice {
    name: String,
    mapping: Vec<MappedPort>,
    patch: Patch,
    devices: Arc<dyn DeviceEnumerator>,
    policy: ResolvePolicy,
    running: RunningEngine,
    table: Option<PortHandleTable>,
}

impl VirtualMidiDevice {
    pub fn builder(ports: impl Into<PortList>) -> BridgeBuilder {
        BridgeBuilder::new(ports.into())
    }

    /// Open a device on midir virtual ports with the default resolve policy
    pub fn open(ports: impl Into<PortList>, name: Option<&str>) -> Result<Self> {
        let mut builder = Self::builder(ports);
        if let Some(name) = name {
            builder = builder.name(name);
        }
        builder.open()
    }

    /// Look up the handles of every port in the I/O library's device lists.
    ///
    /// May be called again after a `PortNotFound`; the engine keeps running.
    /// Once resolved, the table is fixed and later calls return it as is.
    pub fn resolve(&mut self) -> Result<&PortHandleTable> {
        if self.running.is_stopped() {
            return Err(BridgeError::Stopped);
        }

        if self.table.is_none() {
            let table = resolver::resolve(
                &self.mapping,
                self.devices.as_ref(),
                &self.name,
                &self.policy,
            )?;
            info!(
                "Virtual MIDI device '{}' ready with {} port(s)",
                self.name,
                table.len()
            );
            self.table = Some(table);
        }
        self.table.as_ref().ok_or(BridgeError::NotReady)
    }

    /// Handle table, once resolved
    pub fn ports(&self) -> Result<&PortHandleTable> {
        if self.running.is_stopped() {
            return Err(BridgeError::Stopped);
        }
        self.table.as_ref().ok_or(BridgeError::NotReady)
    }

    pub fn port(&self, name: &str) -> Result<PortHandles> {
        self.ports()?
            .get(name)
            .ok_or_else(|| BridgeError::UnknownPort(name.to_string()))
    }

    pub fn is_ready(&self) -> bool {
        self.ports().is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mapping(&self) -> &[MappedPort] {
        &self.mapping
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn resolve_policy(&self) -> ResolvePolicy {
        self.policy
    }

    /// Messages forwarded per rule, if the engine counts them
    pub fn activity(&self) -> Vec<RouteStats> {
        self.running
            .engine()
            .activity()
            .map(|a| a.snapshot())
            .unwrap_or_default()
    }

    /// Error the routing thread hit after start, if any
    pub fn engine_failure(&self) -> Option<String> {
        self.running.failure()
    }

    /// Stop routing and give up the engine slot. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if !self.running.is_stopped() {
            info!("Stopping virtual MIDI device '{}'", self.name);
        }
        self.running.stop();
    }
}

impl std::fmt::Debug for VirtualMidiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMidiDevice")
            .field("name", &self.name)
            .field("ports", &self.mapping.iter().map(|m| &m.logical).collect::<Vec<_>>())
            .field("engine", &self.running)
            .field("table", &self.table)
            .finish()
    }
}
