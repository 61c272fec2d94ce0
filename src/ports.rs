//! Port name mapping
//!
//! Every logical port exposed by the bridge is backed by four physical ports:
//! two facing the application's MIDI I/O library (prefixed with
//! [`INTERNAL_PREFIX`]) and two facing the system MIDI fabric (suffixed with
//! `_in` / `_out`).
//!
//! - ports prefixed with `VMB_` must only be connected from the application
//! - unprefixed ports must only be connected by system tooling
//!
//! Logical names may not start with the prefix themselves, which keeps the
//! internal and system namespaces disjoint.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::error::{BridgeError, Result};

/// Marker for ports that belong to the application side
pub const INTERNAL_PREFIX: &str = "VMB_";

const IN_SUFFIX: &str = "_in";
const OUT_SUFFIX: &str = "_out";

/// Role of a physical port within one logical port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    /// The application receives on it
    InternalIn,
    /// The application sends on it
    InternalOut,
    /// System tooling sends into it
    SystemIn,
    /// System tooling receives from it
    SystemOut,
}

impl PortRole {
    pub const ALL: [PortRole; 4] = [
        PortRole::InternalIn,
        PortRole::InternalOut,
        PortRole::SystemIn,
        PortRole::SystemOut,
    ];

    pub fn is_internal(self) -> bool {
        matches!(self, PortRole::InternalIn | PortRole::InternalOut)
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortRole::InternalIn => "internal-in",
            PortRole::InternalOut => "internal-out",
            PortRole::SystemIn => "system-in",
            PortRole::SystemOut => "system-out",
        };
        f.write_str(s)
    }
}

/// The four physical names derived from one logical port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalPorts {
    pub internal_in: String,
    pub internal_out: String,
    pub system_in: String,
    pub system_out: String,
}

impl PhysicalPorts {
    fn derive(logical: &str) -> Self {
        Self {
            internal_in: format!("{INTERNAL_PREFIX}{logical}{IN_SUFFIX}"),
            internal_out: format!("{INTERNAL_PREFIX}{logical}{OUT_SUFFIX}"),
            system_in: format!("{logical}{IN_SUFFIX}"),
            system_out: format!("{logical}{OUT_SUFFIX}"),
        }
    }

    pub fn get(&self, role: PortRole) -> &str {
        match role {
            PortRole::InternalIn => &self.internal_in,
            PortRole::InternalOut => &self.internal_out,
            PortRole::SystemIn => &self.system_in,
            PortRole::SystemOut => &self.system_out,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PortRole, &str)> {
        PortRole::ALL.into_iter().map(move |role| (role, self.get(role)))
    }
}

/// A logical port together with its physical names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPort {
    pub logical: String,
    pub physical: PhysicalPorts,
}

/// Caller-supplied logical port names
///
/// Accepts either a single name or a sequence of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList(Vec<String>);

impl PortList {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for PortList {
    fn from(name: &str) -> Self {
        PortList(vec![name.to_string()])
    }
}

impl From<String> for PortList {
    fn from(name: String) -> Self {
        PortList(vec![name])
    }
}

impl From<Vec<String>> for PortList {
    fn from(names: Vec<String>) -> Self {
        PortList(names)
    }
}

impl From<Vec<&str>> for PortList {
    fn from(names: Vec<&str>) -> Self {
        PortList(names.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for PortList {
    fn from(names: &[&str]) -> Self {
        PortList(names.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for PortList {
    fn from(names: [&str; N]) -> Self {
        PortList(names.iter().map(|s| s.to_string()).collect())
    }
}

fn invalid(name: &str, reason: &str) -> BridgeError {
    BridgeError::InvalidPortName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn validate(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid(name, "name must not be empty"));
    }
    if name.starts_with(INTERNAL_PREFIX) {
        return Err(invalid(
            name,
            &format!("prefix '{INTERNAL_PREFIX}' is reserved for internal ports"),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid(name, "name must not contain control characters"));
    }
    // ALSA separates client and port with ':'
    if name.contains(':') {
        return Err(invalid(name, "name must not contain ':'"));
    }
    Ok(())
}

/// Derive physical port names for each logical port, preserving input order
pub fn map_ports(names: impl Into<PortList>) -> Result<Vec<MappedPort>> {
    let names = names.into().into_inner();
    if names.is_empty() {
        return Err(invalid("", "at least one port is required"));
    }

    let mut seen = HashSet::with_capacity(names.len());
    let mut mapped = Vec::with_capacity(names.len());

    for name in names {
        validate(&name)?;
        if !seen.insert(name.clone()) {
            return Err(invalid(&name, "duplicate port name"));
        }
        let physical = PhysicalPorts::derive(&name);
        debug!(
            "Mapped port '{}': {} / {} / {} / {}",
            name, physical.internal_in, physical.internal_out, physical.system_in, physical.system_out
        );
        mapped.push(MappedPort {
            logical: name,
            physical,
        });
    }

    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_example_port_names() {
        let mapped = map_ports(["test"]).unwrap();
        assert_eq!(mapped.len(), 1);

        let p = &mapped[0].physical;
        assert_eq!(mapped[0].logical, "test");
        assert_eq!(p.internal_in, "VMB_test_in");
        assert_eq!(p.internal_out, "VMB_test_out");
        assert_eq!(p.system_in, "test_in");
        assert_eq!(p.system_out, "test_out");
    }

    #[test]
    fn test_single_name_is_normalized() {
        let single = map_ports("synth").unwrap();
        let list = map_ports(vec!["synth"]).unwrap();
        assert_eq!(single, list);
    }

    #[test]
    fn test_input_order_preserved() {
        let mapped = map_ports(["b", "a", "c"]).unwrap();
        let names: Vec<_> = mapped.iter().map(|m| m.logical.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(
            map_ports(""),
            Err(BridgeError::InvalidPortName { .. })
        ));
        assert!(matches!(
            map_ports("   "),
            Err(BridgeError::InvalidPortName { .. })
        ));
        assert!(matches!(
            map_ports(Vec::<String>::new()),
            Err(BridgeError::InvalidPortName { .. })
        ));

        match map_ports(["a", "b", "a"]) {
            Err(BridgeError::InvalidPortName { name, .. }) => assert_eq!(name, "a"),
            other => panic!("expected InvalidPortName, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_reserved_prefix() {
        // "VMB_a" would make system-in "VMB_a_in", which is internal-in of "a"
        let err = map_ports(["a", "VMB_a"]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPortName { ref name, .. } if name == "VMB_a"));
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(map_ports("bad\nname").is_err());
    }

    #[test]
    fn test_rejects_colon() {
        assert!(matches!(
            map_ports(["ok", "left:right"]),
            Err(BridgeError::InvalidPortName { ref name, .. }) if name == "left:right"
        ));
    }

    #[test]
    fn test_suffix_lookalikes_do_not_collide() {
        let mapped = map_ports(["a", "a_in", "a_out"]).unwrap();
        let mut all = HashSet::new();
        for m in &mapped {
            for (_, name) in m.physical.iter() {
                assert!(all.insert(name.to_string()), "collision on {}", name);
            }
        }
        assert_eq!(all.len(), 12);
    }

    fn logical_names() -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set("[A-Za-z0-9_ .-]{1,12}", 1..12)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_filter("reserved prefix", |names| {
                names
                    .iter()
                    .all(|n| !n.starts_with(INTERNAL_PREFIX) && !n.trim().is_empty())
            })
    }

    proptest! {
        #[test]
        fn prop_names_are_distinct_and_groups_disjoint(names in logical_names()) {
            let mapped = map_ports(names.clone()).unwrap();
            prop_assert_eq!(mapped.len(), names.len());

            let mut internal = HashSet::new();
            let mut system = HashSet::new();
            for m in &mapped {
                for (role, name) in m.physical.iter() {
                    let fresh = if role.is_internal() {
                        internal.insert(name.to_string())
                    } else {
                        system.insert(name.to_string())
                    };
                    prop_assert!(fresh, "duplicate physical name {}", name);
                }
            }

            prop_assert_eq!(internal.len() + system.len(), 4 * names.len());
            prop_assert!(internal.is_disjoint(&system));
            prop_assert!(internal.iter().all(|n| n.starts_with(INTERNAL_PREFIX)));
            prop_assert!(system.iter().all(|n| !n.starts_with(INTERNAL_PREFIX)));
        }
    }
}
