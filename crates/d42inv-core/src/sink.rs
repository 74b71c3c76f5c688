//! Inventory sinks: dynamic host registration and the static hosts file

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::InventoryError;
use crate::group::Groups;
use crate::record::DeviceId;
use crate::types::{DeviceRecord, InventoryResult};

/// Prefix of host variables generated from device fields
pub const VAR_PREFIX: &str = "d42_";

/// Receiver of hosts, host variables and group memberships
pub trait InventorySink {
    /// Handle to a registered host
    type Handle;

    /// Register a host, returning its handle; registering twice returns the same host
    fn add_host(&mut self, name: &str) -> Self::Handle;

    /// Set a variable on a host
    fn set_variable(&mut self, host: &Self::Handle, key: &str, value: Value);

    /// Add a host to a group, creating the group if needed
    fn add_host_to_group(&mut self, host: &Self::Handle, group: &str);
}

/// Label of a device in an output: the reference field, else the id
#[must_use]
pub fn host_label(device: &DeviceRecord, reference_field: &str) -> String {
    device
        .attribute(reference_field)
        .values()
        .into_iter()
        .next()
        .unwrap_or_else(|| device.device_id.to_string())
}

/// Make a host name safe for the orchestration tool
///
/// Characters outside `[A-Za-z0-9_]` become `_`; case is preserved.
#[must_use]
pub fn safe_host_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Register every device, its variables and its groups with a sink
///
/// Returns the number of hosts registered.
pub fn register<S: InventorySink>(
    sink: &mut S,
    devices: &InventoryResult,
    groups: &Groups,
    reference_field: &str,
) -> usize {
    let mut handles: HashMap<DeviceId, S::Handle> = HashMap::with_capacity(devices.len());

    for device in devices.devices() {
        let name = safe_host_name(&host_label(device, reference_field));
        let host = sink.add_host(&name);

        match serde_json::to_value(device) {
            Ok(Value::Object(fields)) => {
                for (key, value) in fields {
                    sink.set_variable(&host, &format!("{VAR_PREFIX}{key}"), value);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(device = %device.device_id, error = %e, "cannot serialize host variables"),
        }
        if let Some(ip) = device.primary_ip() {
            sink.set_variable(&host, "ansible_host", Value::String(ip.to_string()));
        }

        handles.insert(device.device_id, host);
    }

    for group in groups.iter() {
        for id in group.members() {
            match handles.get(id) {
                Some(host) => sink.add_host_to_group(host, &group.name),
                None => debug!(device = %id, group = %group.name, "group member not registered"),
            }
        }
    }

    handles.len()
}

/// In-memory Ansible inventory, rendered as dynamic inventory JSON
#[derive(Debug, Clone, Default)]
pub struct AnsibleInventory {
    groups: Vec<(String, Vec<String>)>,
    group_index: HashMap<String, usize>,
    hostvars: BTreeMap<String, Map<String, Value>>,
}

impl AnsibleInventory {
    /// Empty inventory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables of a host
    #[must_use]
    pub fn host_vars(&self, host: &str) -> Option<&Map<String, Value>> {
        self.hostvars.get(host)
    }

    /// Hosts of a group
    #[must_use]
    pub fn group_hosts(&self, group: &str) -> Option<&[String]> {
        self.group_index
            .get(group)
            .map(|&pos| self.groups[pos].1.as_slice())
    }

    /// Render as `--list` output
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (name, hosts) in &self.groups {
            root.insert(name.clone(), json!({ "hosts": hosts }));
        }
        root.insert(
            "_meta".to_string(),
            json!({ "hostvars": self.hostvars }),
        );
        Value::Object(root)
    }
}

impl InventorySink for AnsibleInventory {
    type Handle = String;

    fn add_host(&mut self, name: &str) -> String {
        if self.hostvars.contains_key(name) {
            debug!(host = name, "host registered twice");
        }
        self.hostvars.entry(name.to_string()).or_default();
        name.to_string()
    }

    fn set_variable(&mut self, host: &String, key: &str, value: Value) {
        self.hostvars
            .entry(host.clone())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn add_host_to_group(&mut self, host: &String, group: &str) {
        let pos = match self.group_index.get(group) {
            Some(&pos) => pos,
            None => {
                self.group_index.insert(group.to_string(), self.groups.len());
                self.groups.push((group.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        let hosts = &mut self.groups[pos].1;
        if !hosts.contains(host) {
            hosts.push(host.clone());
        }
    }
}

/// Write groups in the static hosts-file format
///
/// Each group becomes a `[name]` header, one member per line, then a blank line.
///
/// # Errors
/// Returns `Output` if the writer fails.
pub fn write_hostfile<W: Write>(
    writer: &mut W,
    groups: &Groups,
    devices: &InventoryResult,
    reference_field: &str,
) -> Result<(), InventoryError> {
    let io = |e: std::io::Error| InventoryError::Output(e.to_string());

    for group in groups.iter() {
        writeln!(writer, "[{}]", group.name).map_err(io)?;
        for id in group.members() {
            let label = devices
                .get(*id)
                .map_or_else(|| id.to_string(), |d| host_label(d, reference_field));
            writeln!(writer, "{label}").map_err(io)?;
        }
        writeln!(writer).map_err(io)?;
    }
    writer.flush().map_err(io)
}
