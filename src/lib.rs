//! Virtual MIDI device bridge
//!
//! Opens a set of named ports that the application reaches through its MIDI
//! I/O library (as `VMB_<port>_in` / `VMB_<port>_out`) and system tooling
//! reaches through the OS MIDI fabric (as `<port>_in` / `<port>_out`), and
//! relays messages between the two sides unmodified.

pub mod bridge;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
pub mod midi;
pub mod patch;
pub mod ports;
pub mod resolver;

pub use bridge::{BridgeBuilder, VirtualMidiDevice};
pub use devices::{DeviceEnumerator, DeviceHandle, DeviceInfo, MidirDevices};
pub use engine::{LoopbackDevices, LoopbackEngine, RoutingEngine, VirtualPortEngine};
pub use error::{BridgeError, Result, Side};
pub use patch::{BridgeConfig, Patch, RoutingRule};
pub use ports::{map_ports, MappedPort, PhysicalPorts, PortList, PortRole, INTERNAL_PREFIX};
pub use resolver::{PortHandleTable, PortHandles, ResolvePolicy};
