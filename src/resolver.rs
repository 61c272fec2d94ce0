//! Handle resolution
//!
//! After the routing engine has created its ports, the application's I/O
//! library has to find them. We look up the internal-facing names (the only
//! ones meaningful to that library) in its device lists and record the
//! handles. Port creation may lag behind engine start, so lookups are retried
//! until a deadline.

use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::devices::{DeviceEnumerator, DeviceHandle, DeviceInfo};
use crate::error::{BridgeError, Result, Side};
use crate::ports::MappedPort;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded retry policy for handle resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvePolicy {
    /// Give up once this much time has passed since the first attempt
    pub timeout: Duration,
    /// Pause between attempts
    pub poll_interval: Duration,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl ResolvePolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Single attempt; assumes ports are visible as soon as the engine starts
    pub fn immediate() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Handles of one logical port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortHandles {
    /// Receive on this handle
    pub input: DeviceHandle,
    /// Send on this handle
    pub output: DeviceHandle,
}

/// Logical port name -> handles, in the order the ports were requested
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortHandleTable {
    entries: Vec<(String, PortHandles)>,
}

impl PortHandleTable {
    pub fn get(&self, port: &str) -> Option<PortHandles> {
        self.entries
            .iter()
            .find(|(name, _)| name == port)
            .map(|(_, handles)| *handles)
    }

    pub fn contains(&self, port: &str) -> bool {
        self.get(port).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PortHandles)> {
        self.entries.iter().map(|(name, h)| (name.as_str(), *h))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn find_handle(devices: &[DeviceInfo], name: &str, client_name: &str) -> Option<DeviceHandle> {
    devices
        .iter()
        .find(|d| d.name == name && d.owned_by(client_name))
        .map(|d| d.handle)
}

fn device_lists(devices: &dyn DeviceEnumerator) -> (Vec<DeviceInfo>, Vec<DeviceInfo>) {
    let inputs = devices.input_devices().unwrap_or_else(|e| {
        debug!("Input device enumeration failed: {}", e);
        Vec::new()
    });
    let outputs = devices.output_devices().unwrap_or_else(|e| {
        debug!("Output device enumeration failed: {}", e);
        Vec::new()
    });
    (inputs, outputs)
}

/// Fail if any physical name of `ports` is already listed by the system.
///
/// Run before the engine creates its ports; afterwards every match would be
/// our own.
pub fn check_collisions(ports: &[MappedPort], devices: &dyn DeviceEnumerator) -> Result<()> {
    let (inputs, outputs) = device_lists(devices);

    for port in ports {
        for (role, name) in port.physical.iter() {
            if let Some(existing) = inputs.iter().chain(&outputs).find(|d| d.name == name) {
                warn!(
                    "Port '{}' ({}) already exists as {} (client {:?})",
                    name, role, existing.handle, existing.client
                );
                return Err(BridgeError::InvalidPortName {
                    name: port.logical.clone(),
                    reason: format!("'{name}' already exists as a system MIDI port"),
                });
            }
        }
    }
    Ok(())
}

/// One pass over the device lists. On a miss, names the first missing port.
fn attempt(
    ports: &[MappedPort],
    devices: &dyn DeviceEnumerator,
    client_name: &str,
) -> std::result::Result<PortHandleTable, (String, Side)> {
    let (inputs, outputs) = device_lists(devices);

    let mut entries = Vec::with_capacity(ports.len());
    for port in ports {
        let input = find_handle(&inputs, &port.physical.internal_in, client_name)
            .ok_or_else(|| (port.logical.clone(), Side::In))?;
        let output = find_handle(&outputs, &port.physical.internal_out, client_name)
            .ok_or_else(|| (port.logical.clone(), Side::Out))?;
        entries.push((port.logical.clone(), PortHandles { input, output }));
    }

    Ok(PortHandleTable { entries })
}

/// Resolve every port's in/out handles, polling until `policy.timeout`
///
/// Entries whose backend reports an owning client other than `client_name`
/// are skipped, so same-named ports of another program are never picked.
pub fn resolve(
    ports: &[MappedPort],
    devices: &dyn DeviceEnumerator,
    client_name: &str,
    policy: &ResolvePolicy,
) -> Result<PortHandleTable> {
    let started = Instant::now();
    let poll_interval = policy.poll_interval.max(MIN_POLL_INTERVAL);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match attempt(ports, devices, client_name) {
            Ok(table) => {
                debug!(
                    "Resolved {} ports after {} attempt(s) in {:?}",
                    table.len(),
                    attempts,
                    started.elapsed()
                );
                return Ok(table);
            },
            Err((port, side)) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.timeout {
                    warn!(
                        "Port '{}' ({}) not visible after {} attempt(s) in {:?}",
                        port, side, attempts, elapsed
                    );
                    return Err(BridgeError::PortNotFound { port, side });
                }
                trace!("Port '{}' ({}) not visible yet, retrying", port, side);
                thread::sleep(poll_interval.min(policy.timeout - elapsed));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::map_ports;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticDevices {
        inputs: Vec<DeviceInfo>,
        outputs: Vec<DeviceInfo>,
        calls: AtomicUsize,
        /// Lists stay empty for this many calls to input_devices
        hidden_for: usize,
    }

    impl StaticDevices {
        fn new(inputs: &[(&str, usize)], outputs: &[(&str, usize)]) -> Self {
            fn list(items: &[(&str, usize)]) -> Vec<DeviceInfo> {
                items
                    .iter()
                    .map(|(name, h)| DeviceInfo::new(*name, DeviceHandle::new(*h)))
                    .collect()
            }
            Self {
                inputs: list(inputs),
                outputs: list(outputs),
                calls: AtomicUsize::new(0),
                hidden_for: 0,
            }
        }

        fn hidden_for(mut self, calls: usize) -> Self {
            self.hidden_for = calls;
            self
        }

        fn visible(&self) -> bool {
            self.calls.load(Ordering::SeqCst) > self.hidden_for
        }
    }

    impl DeviceEnumerator for StaticDevices {
        fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if self.visible() { self.inputs.clone() } else { Vec::new() })
        }

        fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(if self.visible() { self.outputs.clone() } else { Vec::new() })
        }
    }

    struct BrokenDevices;

    impl DeviceEnumerator for BrokenDevices {
        fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
            Err(BridgeError::Device("no sequencer".into()))
        }

        fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
            Err(BridgeError::Device("no sequencer".into()))
        }
    }

    const CLIENT: &str = "Demo";

    /// Device lists built from raw ALSA sequencer names
    struct AlsaLikeDevices {
        inputs: Vec<DeviceInfo>,
        outputs: Vec<DeviceInfo>,
    }

    impl AlsaLikeDevices {
        fn new(inputs: &[&str], outputs: &[&str]) -> Self {
            let inputs: Vec<DeviceInfo> = inputs
                .iter()
                .enumerate()
                .map(|(i, raw)| DeviceInfo::from_alsa(raw, DeviceHandle::new(i)))
                .collect();
            let offset = inputs.len();
            let outputs = outputs
                .iter()
                .enumerate()
                .map(|(i, raw)| DeviceInfo::from_alsa(raw, DeviceHandle::new(offset + i)))
                .collect();
            Self { inputs, outputs }
        }
    }

    impl DeviceEnumerator for AlsaLikeDevices {
        fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.inputs.clone())
        }

        fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(self.outputs.clone())
        }
    }

    fn fast_policy(timeout_ms: u64) -> ResolvePolicy {
        ResolvePolicy::new(Duration::from_millis(timeout_ms), Duration::from_millis(5))
    }

    #[test]
    fn test_resolves_exact_handles() {
        let ports = map_ports("test").unwrap();
        let devices = StaticDevices::new(
            &[("Midi Through Port-0", 0), ("VMB_test_in", 7), ("test_out", 8)],
            &[("Midi Through Port-0", 0), ("VMB_test_out", 3), ("test_in", 4)],
        );

        let table = resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("test"),
            Some(PortHandles {
                input: DeviceHandle::new(7),
                output: DeviceHandle::new(3),
            })
        );
        assert_eq!(table.get("other"), None);
    }

    #[test]
    fn test_system_names_are_ignored() {
        // Only the internal-facing names count, even if system ones are listed
        let ports = map_ports("test").unwrap();
        let devices = StaticDevices::new(&[("test_in", 1)], &[("test_out", 2)]);

        let err = resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).unwrap_err();
        assert_eq!(
            err,
            BridgeError::PortNotFound {
                port: "test".into(),
                side: Side::In,
            }
        );
    }

    #[test]
    fn test_missing_output_names_side() {
        let ports = map_ports(["a", "b"]).unwrap();
        let devices = StaticDevices::new(
            &[("VMB_a_in", 0), ("VMB_b_in", 1)],
            &[("VMB_a_out", 2)],
        );

        let err = resolve(&ports, &devices, CLIENT, &fast_policy(30)).unwrap_err();
        assert_eq!(
            err,
            BridgeError::PortNotFound {
                port: "b".into(),
                side: Side::Out,
            }
        );
    }

    #[test]
    fn test_times_out_within_bound() {
        let ports = map_ports("ghost").unwrap();
        let devices = StaticDevices::new(&[], &[]);
        let policy = fast_policy(150);

        let started = Instant::now();
        let err = resolve(&ports, &devices, CLIENT, &policy).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BridgeError::PortNotFound { ref port, side: Side::In } if port == "ghost"));
        assert!(elapsed >= policy.timeout);
        assert!(elapsed < policy.timeout + Duration::from_millis(500));
        assert!(devices.calls.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_polls_until_devices_appear() {
        let ports = map_ports("late").unwrap();
        let devices =
            StaticDevices::new(&[("VMB_late_in", 5)], &[("VMB_late_out", 6)]).hidden_for(3);

        let table = resolve(&ports, &devices, CLIENT, &fast_policy(1000)).unwrap();
        assert_eq!(table.get("late").unwrap().output, DeviceHandle::new(6));
        assert_eq!(devices.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_immediate_policy_tries_once() {
        let ports = map_ports("late").unwrap();
        let devices =
            StaticDevices::new(&[("VMB_late_in", 5)], &[("VMB_late_out", 6)]).hidden_for(1);

        assert!(resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).is_err());
        assert_eq!(devices.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_enumeration_errors_count_as_missing() {
        let ports = map_ports("test").unwrap();
        let err = resolve(&ports, &BrokenDevices, CLIENT, &fast_policy(20)).unwrap_err();
        assert!(matches!(err, BridgeError::PortNotFound { .. }));
    }

    #[test]
    fn test_table_preserves_request_order() {
        let ports = map_ports(["z", "a"]).unwrap();
        let devices = StaticDevices::new(
            &[("VMB_a_in", 0), ("VMB_z_in", 1)],
            &[("VMB_a_out", 2), ("VMB_z_out", 3)],
        );
        let table = resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn test_skips_same_name_of_other_client() {
        let ports = map_ports("test").unwrap();
        let devices = AlsaLikeDevices::new(
            &["Other:VMB_test_in 129:0", "Demo:VMB_test_in 130:0"],
            &["Other:VMB_test_out 129:1", "Demo:VMB_test_out 130:1"],
        );

        let table = resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).unwrap();
        assert_eq!(
            table.get("test"),
            Some(PortHandles {
                input: DeviceHandle::new(1),
                output: DeviceHandle::new(3),
            })
        );
    }

    #[test]
    fn test_only_other_client_is_not_found() {
        let ports = map_ports("test").unwrap();
        let devices = AlsaLikeDevices::new(&["Other:VMB_test_in 129:0"], &["Other:VMB_test_out 129:1"]);

        let err = resolve(&ports, &devices, CLIENT, &ResolvePolicy::immediate()).unwrap_err();
        assert!(matches!(err, BridgeError::PortNotFound { side: Side::In, .. }));
    }

    #[test]
    fn test_client_name_with_colon_resolves() {
        let ports = map_ports("test").unwrap();
        let devices = AlsaLikeDevices::new(
            &["Studio: A:VMB_test_in 128:0"],
            &["Studio: A:VMB_test_out 128:1"],
        );

        let table = resolve(&ports, &devices, "Studio: A", &ResolvePolicy::immediate()).unwrap();
        assert_eq!(table.get("test").unwrap().input, DeviceHandle::new(0));
    }

    #[test]
    fn test_collision_with_existing_system_port() {
        let ports = map_ports(["keys", "test"]).unwrap();
        let devices = AlsaLikeDevices::new(
            &["Midi Through:Midi Through Port-0 14:0"],
            &["Other:test_in 129:0"],
        );

        match check_collisions(&ports, &devices) {
            Err(BridgeError::InvalidPortName { name, reason }) => {
                assert_eq!(name, "test");
                assert!(reason.contains("test_in"));
            },
            other => panic!("expected InvalidPortName, got {:?}", other),
        }
    }

    #[test]
    fn test_no_collision_on_clean_system() {
        let ports = map_ports("test").unwrap();
        let devices = AlsaLikeDevices::new(
            &["Midi Through:Midi Through Port-0 14:0"],
            &["Midi Through:Midi Through Port-0 14:0"],
        );
        assert!(check_collisions(&ports, &devices).is_ok());
        assert!(check_collisions(&ports, &BrokenDevices).is_ok());
    }
}
