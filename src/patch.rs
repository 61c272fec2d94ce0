//! Routing patch and engine configuration
//!
//! The patch is a flat list of forwarding rules. For each logical port:
//! internal-out forwards to system-out, system-in forwards to internal-in.

use std::fmt;

use tracing::debug;

use crate::ports::MappedPort;

/// Client name used when the caller doesn't provide one
pub const DEFAULT_CLIENT_NAME: &str = "Virtual MIDI Bridge";

/// Forward every message seen on `source` to `destination`, unmodified
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingRule {
    pub source: String,
    pub destination: String,
}

impl fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >> {}", self.source, self.destination)
    }
}

/// Ordered set of routing rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    rules: Vec<RoutingRule>,
}

impl Patch {
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Destinations of every rule whose source is `source`
    pub fn destinations<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.source == source)
            .map(|rule| rule.destination.as_str())
    }
}

/// Build the forwarding rules for a set of mapped ports
pub fn build_patch(ports: &[MappedPort]) -> Patch {
    let mut rules = Vec::with_capacity(ports.len() * 2);

    for port in ports {
        let p = &port.physical;
        rules.push(RoutingRule {
            source: p.internal_out.clone(),
            destination: p.system_out.clone(),
        });
        rules.push(RoutingRule {
            source: p.system_in.clone(),
            destination: p.internal_in.clone(),
        });
    }

    debug_assert!(rules.iter().all(|r| r.source != r.destination));
    debug!("Built routing patch with {} rules", rules.len());

    Patch { rules }
}

/// Ports the routing engine opens as its own MIDI client
///
/// `input_ports` are read by the engine (the application's out side and the
/// system's in side); `output_ports` are written by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub client_name: String,
    pub input_ports: Vec<String>,
    pub output_ports: Vec<String>,
}

impl BridgeConfig {
    pub fn from_ports(client_name: impl Into<String>, ports: &[MappedPort]) -> Self {
        let internal_out = ports.iter().map(|p| p.physical.internal_out.clone());
        let system_in = ports.iter().map(|p| p.physical.system_in.clone());
        let internal_in = ports.iter().map(|p| p.physical.internal_in.clone());
        let system_out = ports.iter().map(|p| p.physical.system_out.clone());

        Self {
            client_name: client_name.into(),
            input_ports: internal_out.chain(system_in).collect(),
            output_ports: internal_in.chain(system_out).collect(),
        }
    }

    /// All port names, inputs first
    pub fn all_ports(&self) -> Vec<String> {
        self.input_ports
            .iter()
            .chain(self.output_ports.iter())
            .cloned()
            .collect()
    }
}
