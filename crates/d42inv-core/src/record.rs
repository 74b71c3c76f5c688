//! Flat records as returned by the data source

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(DeviceId)
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        DeviceId(id)
    }
}

/// Kind of record set fetched from the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// One row per device
    Device,
    /// IP address assignments
    IpAddress,
    /// Network ports / MAC addresses
    MacAddress,
    /// Disk details
    HddDetail,
    /// Custom field values
    CustomField,
    /// External links (URLs)
    ExternalLink,
    /// Purchase and entitlement line items
    PurchaseLineItem,
}

impl RecordKind {
    /// All detail kinds, in join order
    pub const DETAILS: [RecordKind; 6] = [
        RecordKind::IpAddress,
        RecordKind::MacAddress,
        RecordKind::HddDetail,
        RecordKind::CustomField,
        RecordKind::ExternalLink,
        RecordKind::PurchaseLineItem,
    ];

    /// Whether rows of this kind hang off a device
    #[must_use]
    pub fn is_detail(self) -> bool {
        self != RecordKind::Device
    }

    /// Stable short name, also used as config key
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Device => "device",
            RecordKind::IpAddress => "ip_address",
            RecordKind::MacAddress => "mac_address",
            RecordKind::HddDetail => "hdd_detail",
            RecordKind::CustomField => "custom_field",
            RecordKind::ExternalLink => "external_link",
            RecordKind::PurchaseLineItem => "purchase_line_item",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a query result: field name to optional scalar
///
/// A field that is present with a `None` value was returned as null; a field
/// that is not present at all was not part of the result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatRecord {
    fields: BTreeMap<String, Option<String>>,
}

impl FlatRecord {
    /// Create an empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field
    pub fn insert(&mut self, field: impl Into<String>, value: Option<String>) {
        self.fields.insert(field.into(), value);
    }

    /// Builder-style field setter
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, Some(value.into()));
        self
    }

    /// Value of a field; `None` when absent or null
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    /// Whether the field is part of this record at all
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterate over fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_absent_are_distinguishable() {
        let mut record = FlatRecord::new();
        record.insert("notes", None);

        assert!(record.contains("notes"));
        assert_eq!(record.get("notes"), None);
        assert!(!record.contains("name"));
        assert_eq!(record.get("name"), None);
    }

    #[test]
    fn test_device_id_parses_padded_values() {
        assert_eq!(" 42 ".parse::<DeviceId>(), Ok(DeviceId(42)));
        assert!("abc".parse::<DeviceId>().is_err());
        assert!("".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_record_kind_names() {
        assert_eq!(RecordKind::PurchaseLineItem.to_string(), "purchase_line_item");
        assert!(!RecordKind::Device.is_detail());
        assert!(RecordKind::DETAILS.iter().all(|k| k.is_detail()));
    }
}
