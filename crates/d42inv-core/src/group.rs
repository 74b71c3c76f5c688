//! Grouping engine
//!
//! Partitions aggregated devices into named groups. Group names are
//! normalized with [`safe_group_name`]; groups keep first-seen order and
//! never list a device twice.

use std::collections::{HashMap, HashSet};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, instrument};

use crate::error::{InventoryError, MalformedPolicy};
use crate::project::split_list;
use crate::record::DeviceId;
use crate::types::{Attribute, DeviceRecord, InventoryResult};

/// Name of the fallback group used for devices without a grouping value
pub const DEFAULT_EMPTY_GROUP: &str = "none";

/// Placement of devices whose grouping value is empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyPolicy {
    /// Leave the device out of every group
    Drop,
    /// Put the device into the named group
    Bucket(String),
}

impl Default for EmptyPolicy {
    fn default() -> Self {
        EmptyPolicy::Bucket(DEFAULT_EMPTY_GROUP.to_string())
    }
}

/// One derived group-name expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedGroup {
    /// Device field providing the value; a `d42_` prefix is accepted
    pub key: String,
    /// Prefix of the group name
    #[serde(default)]
    pub prefix: String,
    /// Separator between prefix and value
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Value used when the device has none
    #[serde(default)]
    pub default_value: Option<String>,
    /// Keep the separator when the prefix is empty
    #[serde(default = "default_leading_separator")]
    pub leading_separator: bool,
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_leading_separator() -> bool {
    true
}

impl KeyedGroup {
    /// Keyed group with default prefix and separator
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prefix: String::new(),
            separator: default_separator(),
            default_value: None,
            leading_separator: default_leading_separator(),
        }
    }

    /// Set the prefix
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the separator
    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    fn group_name(&self, value: &str) -> String {
        if self.prefix.is_empty() && !self.leading_separator {
            return value.to_string();
        }
        format!("{}{}{}", self.prefix, self.separator, value)
    }
}

/// Grouping strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingSpec {
    /// Group by the value of one field
    SingleField {
        /// Device field
        field: String,
        /// Treat the value as a comma-joined list
        split_on_comma: bool,
        /// Placement of devices with an empty value
        empty_policy: EmptyPolicy,
    },
    /// One group per value of a multi-valued field
    MultiValueField {
        /// Device field
        field: String,
        /// Group for devices without any value
        fallback: Option<String>,
    },
    /// Group names derived from several expressions
    ComposedKeys(Vec<KeyedGroup>),
}

/// Normalize a raw value into a group name
///
/// Trims, lower-cases, turns whitespace runs into one `_` and replaces
/// every other character outside `[a-z0-9_]` with `_`.
#[must_use]
pub fn safe_group_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut in_space = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                name.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        let c = c.to_ascii_lowercase();
        name.push(if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' });
    }
    name
}

/// One group and its members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Normalized name
    pub name: String,
    members: Vec<DeviceId>,
    seen: HashSet<DeviceId>,
}

impl Group {
    fn new(name: String) -> Self {
        Self {
            name,
            members: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Members in first-seen order
    #[must_use]
    pub fn members(&self) -> &[DeviceId] {
        &self.members
    }
}

/// Ordered mapping of group name to members
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Groups {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

impl Groups {
    /// Empty mapping
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to a group, creating the group on first use
    ///
    /// Adding the same device twice is a no-op.
    pub fn add(&mut self, name: &str, device: DeviceId) {
        let pos = match self.index.get(name) {
            Some(&pos) => pos,
            None => {
                self.index.insert(name.to_string(), self.groups.len());
                self.groups.push(Group::new(name.to_string()));
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[pos];
        if group.seen.insert(device) {
            group.members.push(device);
        }
    }

    /// Members of a group
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[DeviceId]> {
        self.index.get(name).map(|&pos| self.groups[pos].members())
    }

    /// Groups in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    /// Group names in first-seen order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    /// Names of the groups a device belongs to
    #[must_use]
    pub fn groups_of(&self, device: DeviceId) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|g| g.seen.contains(&device))
            .map(|g| g.name.as_str())
            .collect()
    }

    /// Number of groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Serialize for Groups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for group in &self.groups {
            map.serialize_entry(&group.name, &group.members)?;
        }
        map.end()
    }
}

/// Evaluates a [`GroupingSpec`] over aggregated devices
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    spec: GroupingSpec,
    policy: MalformedPolicy,
}

impl GroupingEngine {
    /// Create an engine that treats missing fields as empty values
    #[must_use]
    pub fn new(spec: GroupingSpec) -> Self {
        Self {
            spec,
            policy: MalformedPolicy::Recover,
        }
    }

    /// Set the malformed-record policy
    #[must_use]
    pub fn with_policy(mut self, policy: MalformedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Partition devices into groups
    ///
    /// # Errors
    /// Only in [`MalformedPolicy::Strict`]: returns `MissingGroupField` for
    /// the first device that lacks a grouping field entirely.
    #[instrument(skip_all, fields(devices = devices.len()))]
    pub fn group(&self, devices: &InventoryResult) -> Result<Groups, InventoryError> {
        let mut groups = Groups::new();
        let mut dropped = 0usize;

        for device in devices.devices() {
            let names = self.names_for(device)?;
            if names.is_empty() {
                debug!(device = %device.device_id, "device not placed in any group");
                dropped += 1;
            }
            for name in names {
                groups.add(&name, device.device_id);
            }
        }

        info!(groups = groups.len(), ungrouped = dropped, "grouping completed");
        Ok(groups)
    }

    fn lookup(&self, device: &DeviceRecord, field: &str) -> Result<Attribute, InventoryError> {
        let attr = device.attribute(field);
        if attr == Attribute::Missing && self.policy == MalformedPolicy::Strict {
            return Err(InventoryError::MissingGroupField {
                device: device.device_id,
                field: field.to_string(),
            });
        }
        Ok(attr)
    }

    fn names_for(&self, device: &DeviceRecord) -> Result<Vec<String>, InventoryError> {
        let names = match &self.spec {
            GroupingSpec::SingleField {
                field,
                split_on_comma,
                empty_policy,
            } => {
                let value = match self.lookup(device, field)? {
                    Attribute::Missing | Attribute::Null => String::new(),
                    Attribute::Text(v) => v,
                    Attribute::List(vs) => vs.join(","),
                };
                let names: Vec<String> = if *split_on_comma {
                    value.split(',').map(safe_group_name).collect()
                } else {
                    vec![safe_group_name(&value)]
                };
                let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
                if names.is_empty() {
                    match empty_policy {
                        EmptyPolicy::Drop => Vec::new(),
                        EmptyPolicy::Bucket(bucket) => vec![safe_group_name(bucket)],
                    }
                } else {
                    names
                }
            }
            GroupingSpec::MultiValueField { field, fallback } => {
                let values = match self.lookup(device, field)? {
                    Attribute::Missing | Attribute::Null => Vec::new(),
                    Attribute::Text(v) => split_list(Some(&v)),
                    Attribute::List(vs) => vs,
                };
                let names: Vec<String> = values
                    .iter()
                    .map(|v| safe_group_name(v))
                    .filter(|n| !n.is_empty())
                    .collect();
                match fallback {
                    Some(fallback) if names.is_empty() => vec![safe_group_name(fallback)],
                    _ => names,
                }
            }
            GroupingSpec::ComposedKeys(keys) => {
                let mut names = Vec::new();
                for keyed in keys {
                    let mut attr = device.attribute(&keyed.key);
                    if attr == Attribute::Missing
                        && let Some(stripped) = keyed.key.strip_prefix("d42_")
                    {
                        attr = device.attribute(stripped);
                    }
                    if attr == Attribute::Missing && self.policy == MalformedPolicy::Strict {
                        return Err(InventoryError::MissingGroupField {
                            device: device.device_id,
                            field: keyed.key.clone(),
                        });
                    }

                    let mut values = attr.values();
                    if values.is_empty()
                        && let Some(default) = &keyed.default_value
                    {
                        values.push(default.clone());
                    }
                    names.extend(
                        values
                            .iter()
                            .map(|v| safe_group_name(&keyed.group_name(v)))
                            .filter(|n| !n.is_empty()),
                    );
                }
                names
            }
        };
        Ok(names)
    }
}

/// Group with the recover-locally policy
#[must_use]
pub fn group(devices: &InventoryResult, spec: GroupingSpec) -> Groups {
    GroupingEngine::new(spec)
        .group(devices)
        .unwrap_or_default()
}
