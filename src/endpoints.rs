//! Application-side connections to the bridge's ports
//!
//! Opens one sender and one listener per logical port, either through midir
//! on the resolved handles or directly on a loopback engine. Everything that
//! arrives is pushed to a single channel as [`Received`].

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::RecvTimeoutError;
use midir::{MidiInputConnection, MidiOutputConnection};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vmidi_bridge::devices;
use vmidi_bridge::{DeviceHandle, LoopbackDevices, LoopbackEngine, VirtualMidiDevice};

const LISTEN_TICK: Duration = Duration::from_millis(50);

/// Where a received message was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Application input, routed from the system side
    App,
    /// System output, only observable on the loopback engine
    System,
}

#[derive(Debug, Clone)]
pub struct Received {
    pub port: String,
    pub origin: Origin,
    pub data: Vec<u8>,
}

pub enum Backend {
    Midir,
    Loopback(Arc<LoopbackDevices>),
}

enum Outbound {
    Midir(Mutex<MidiOutputConnection>),
    Loopback {
        devices: Arc<LoopbackDevices>,
        handle: DeviceHandle,
    },
}

enum Listener {
    Midir(MidiInputConnection<()>),
    Thread(JoinHandle<()>),
}

pub struct Endpoints {
    outbound: HashMap<String, Outbound>,
    listeners: Vec<Listener>,
    loopback: Option<Arc<LoopbackEngine>>,
    running: Arc<AtomicBool>,
}

impl Endpoints {
    /// Connect to every port of a resolved device
    pub fn connect(
        device: &VirtualMidiDevice,
        backend: Backend,
        tx: mpsc::UnboundedSender<Received>,
    ) -> Result<Self> {
        let mut endpoints = Self {
            outbound: HashMap::new(),
            listeners: Vec::new(),
            loopback: None,
            running: Arc::new(AtomicBool::new(true)),
        };

        let client_name = format!("{} app", device.name());
        for (port, handles) in device.ports()?.iter() {
            match &backend {
                Backend::Midir => {
                    let conn = devices::connect_output(handles.output, &client_name)
                        .with_context(|| format!("Failed to open output for port '{}'", port))?;
                    endpoints
                        .outbound
                        .insert(port.to_string(), Outbound::Midir(Mutex::new(conn)));

                    let tx = tx.clone();
                    let label = port.to_string();
                    let conn = devices::connect_input(handles.input, &client_name, move |_, data| {
                        let _ = tx.send(Received {
                            port: label.clone(),
                            origin: Origin::App,
                            data: data.to_vec(),
                        });
                    })
                    .with_context(|| format!("Failed to open input for port '{}'", port))?;
                    endpoints.listeners.push(Listener::Midir(conn));
                },
                Backend::Loopback(loopback) => {
                    endpoints.outbound.insert(
                        port.to_string(),
                        Outbound::Loopback {
                            devices: loopback.clone(),
                            handle: handles.output,
                        },
                    );

                    let app_in = loopback.receiver(handles.input)?;
                    endpoints.spawn_listener(port, Origin::App, app_in, tx.clone())?;

                    let system_out = loopback
                        .engine()
                        .receiver(&format!("{}_out", port))
                        .ok_or_else(|| anyhow!("No system output queue for port '{}'", port))?;
                    endpoints.spawn_listener(port, Origin::System, system_out, tx.clone())?;
                },
            }
            debug!("Connected to port '{}' ({} / {})", port, handles.input, handles.output);
        }

        if let Backend::Loopback(loopback) = backend {
            endpoints.loopback = Some(loopback.engine().clone());
        }

        Ok(endpoints)
    }

    fn spawn_listener(
        &mut self,
        port: &str,
        origin: Origin,
        rx: crossbeam::channel::Receiver<Vec<u8>>,
        tx: mpsc::UnboundedSender<Received>,
    ) -> Result<()> {
        let running = self.running.clone();
        let label = port.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("listen-{}", port))
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match rx.recv_timeout(LISTEN_TICK) {
                        Ok(data) => {
                            let received = Received {
                                port: label.clone(),
                                origin,
                                data,
                            };
                            if tx.send(received).is_err() {
                                break;
                            }
                        },
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        self.listeners.push(Listener::Thread(handle));
        Ok(())
    }

    pub fn port_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outbound.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Send from the application side of a port
    pub fn send(&self, port: &str, data: &[u8]) -> Result<()> {
        match self.outbound.get(port) {
            Some(Outbound::Midir(conn)) => conn
                .lock()
                .send(data)
                .map_err(|e| anyhow!("Send on '{}' failed: {}", port, e)),
            Some(Outbound::Loopback { devices, handle }) => Ok(devices.send(*handle, data)?),
            None => Err(anyhow!("Unknown port '{}'", port)),
        }
    }

    /// Play the system side of a port (loopback only)
    pub fn inject(&self, port: &str, data: &[u8]) -> Result<()> {
        let engine = self
            .loopback
            .as_ref()
            .ok_or_else(|| anyhow!("inject is only available with --loopback"))?;
        if !self.outbound.contains_key(port) {
            return Err(anyhow!("Unknown port '{}'", port));
        }
        Ok(engine.send(&format!("{}_in", port), data)?)
    }

    pub fn can_inject(&self) -> bool {
        self.loopback.is_some()
    }
}

impl Drop for Endpoints {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for listener in self.listeners.drain(..) {
            match listener {
                Listener::Midir(conn) => {
                    conn.close();
                },
                Listener::Thread(handle) => {
                    if handle.join().is_err() {
                        warn!("Listener thread panicked");
                    }
                },
            }
        }
        for (_, outbound) in self.outbound.drain() {
            if let Outbound::Midir(conn) = outbound {
                conn.into_inner().close();
            }
        }
    }
}
