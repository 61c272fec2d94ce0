//! Error types for the virtual MIDI bridge

use std::fmt;
use thiserror::Error;

/// Which side of a logical port a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The handle the application receives on
    In,
    /// The handle the application sends on
    Out,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::In => write!(f, "in"),
            Side::Out => write!(f, "out"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid port name '{name}': {reason}")]
    InvalidPortName { name: String, reason: String },

    /// Only one routing engine may run per process
    #[error(
        "Can't open multiple virtual MIDI devices in the same process \
         (ports={requested_ports:?}, name={requested_name}, active={active_name})"
    )]
    AlreadyActive {
        requested_name: String,
        requested_ports: Vec<String>,
        active_name: String,
    },

    #[error("Routing engine failed to launch: {0}")]
    EngineLaunch(String),

    #[error("Port '{port}' ({side}) not found in device list")]
    PortNotFound { port: String, side: Side },

    #[error("MIDI device error: {0}")]
    Device(String),

    #[error("Virtual device is not ready (ports not resolved)")]
    NotReady,

    #[error("Virtual device has been stopped")]
    Stopped,

    #[error("Unknown port: {0}")]
    UnknownPort(String),
}

impl From<midir::InitError> for BridgeError {
    fn from(e: midir::InitError) -> Self {
        BridgeError::Device(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for BridgeError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        BridgeError::Device(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for BridgeError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        BridgeError::Device(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
