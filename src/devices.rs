//! MIDI device enumeration
//!
//! The bridge never talks MIDI bytes itself; it only needs the application's
//! I/O library to list its input and output devices as `(name, handle)`
//! pairs. [`MidirDevices`] is that list for midir, where the handle is the
//! port's index in midir's port list.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::fmt;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::ports::INTERNAL_PREFIX;

/// Opaque device identifier assigned by the I/O library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(usize);

impl DeviceHandle {
    pub fn new(index: usize) -> Self {
        DeviceHandle(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of a device list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub handle: DeviceHandle,
    /// Owning client, when the backend reports one (ALSA sequencer)
    pub client: Option<String>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, handle: DeviceHandle) -> Self {
        Self {
            name: name.into(),
            handle,
            client: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Entry for a raw ALSA sequencer name (`"<client>:<port> <C>:<P>"`)
    pub fn from_alsa(raw: &str, handle: DeviceHandle) -> Self {
        let (client, name) = split_alsa_name(raw);
        let info = Self::new(name, handle);
        match client {
            Some(client) => info.with_client(client),
            None => info,
        }
    }

    /// Whether this device is one of the bridge's application-side ports
    pub fn is_internal(&self) -> bool {
        self.name.starts_with(INTERNAL_PREFIX)
    }

    /// Whether this entry could belong to `client_name`. Entries without a
    /// known client match any name.
    pub fn owned_by(&self, client_name: &str) -> bool {
        self.client.as_deref().map_or(true, |c| c == client_name)
    }
}

/// Device enumeration of the application's MIDI I/O library
pub trait DeviceEnumerator: Send + Sync {
    /// Devices the application can receive from
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Devices the application can send to
    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;
}

/// Split an ALSA sequencer port name into client and port
///
/// ALSA reports `"<client>:<port> <client-id>:<port-id>"`. Client names may
/// contain ':' themselves, so the split is on the last one; bridge port names
/// never contain ':'.
pub fn split_alsa_name(raw: &str) -> (Option<&str>, &str) {
    let name = raw.trim();
    let name = match name.rsplit_once(' ') {
        Some((head, addr)) if is_alsa_address(addr) => head,
        _ => name,
    };
    match name.rsplit_once(':') {
        Some((client, port)) => (Some(client), port),
        None => (None, name),
    }
}

/// Strip backend decoration from a midir port name
///
/// Only ALSA decorates names; other backends report the port name as-is.
pub fn normalize_port_name(raw: &str) -> &str {
    if cfg!(target_os = "linux") {
        split_alsa_name(raw).1
    } else {
        raw.trim()
    }
}

fn is_alsa_address(s: &str) -> bool {
    match s.split_once(':') {
        Some((client, port)) => {
            !client.is_empty()
                && !port.is_empty()
                && client.bytes().all(|b| b.is_ascii_digit())
                && port.bytes().all(|b| b.is_ascii_digit())
        },
        None => false,
    }
}

fn device_info(raw: &str, handle: DeviceHandle) -> DeviceInfo {
    if cfg!(target_os = "linux") {
        DeviceInfo::from_alsa(raw, handle)
    } else {
        DeviceInfo::new(raw.trim(), handle)
    }
}

/// Device list read through midir
pub struct MidirDevices {
    client_name: String,
}

impl MidirDevices {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl DeviceEnumerator for MidirDevices {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        let midi_in = MidiInput::new(&self.client_name)?;
        let devices: Vec<DeviceInfo> = midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let raw = midi_in.port_name(port).ok()?;
                Some(device_info(&raw, DeviceHandle::new(index)))
            })
            .collect();
        debug!("Found {} MIDI input devices", devices.len());
        Ok(devices)
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        let midi_out = MidiOutput::new(&self.client_name)?;
        let devices: Vec<DeviceInfo> = midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                let raw = midi_out.port_name(port).ok()?;
                Some(device_info(&raw, DeviceHandle::new(index)))
            })
            .collect();
        debug!("Found {} MIDI output devices", devices.len());
        Ok(devices)
    }
}

/// Open a midir output connection to the device behind `handle`
///
/// Handles are indices into midir's port list; open connections soon after
/// resolving, before other devices come and go.
pub fn connect_output(handle: DeviceHandle, client_name: &str) -> Result<MidiOutputConnection> {
    let midi_out = MidiOutput::new(client_name)?;
    let port = midi_out
        .ports()
        .into_iter()
        .nth(handle.index())
        .ok_or_else(|| BridgeError::Device(format!("no MIDI output device {handle}")))?;
    let conn = midi_out.connect(&port, client_name)?;
    debug!("Output connection opened on device {}", handle);
    Ok(conn)
}

/// Open a midir input connection to the device behind `handle`
pub fn connect_input<F>(
    handle: DeviceHandle,
    client_name: &str,
    mut callback: F,
) -> Result<MidiInputConnection<()>>
where
    F: FnMut(u64, &[u8]) + Send + 'static,
{
    let mut midi_in = MidiInput::new(client_name)?;
    midi_in.ignore(Ignore::None);
    let port = midi_in
        .ports()
        .into_iter()
        .nth(handle.index())
        .ok_or_else(|| BridgeError::Device(format!("no MIDI input device {handle}")))?;
    let conn = midi_in.connect(
        &port,
        client_name,
        move |timestamp, data, _| callback(timestamp, data),
        (),
    )?;
    debug!("Input connection opened on device {}", handle);
    Ok(conn)
}
