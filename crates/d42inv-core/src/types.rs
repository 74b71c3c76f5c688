//! Inventory type definitions

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::project;
use crate::record::{DeviceId, RecordKind};

// ============================================================================
// Device
// ============================================================================

/// Fully aggregated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device primary key
    pub device_id: DeviceId,
    /// Device name
    pub name: Option<String>,
    /// Serial number
    pub serial_no: Option<String>,
    /// Asset number
    pub asset_no: Option<String>,
    /// Hardware or hypervisor UUID
    pub uuid: Option<String>,
    /// Device type (physical, virtual, blade, ...)
    pub device_type: Option<String>,
    /// Virtualization subtype (vmware, kvm, ...)
    pub virtual_subtype: Option<String>,
    /// Service level (Production, QA, ...)
    pub service_level: Option<String>,
    /// Whether the device is in service
    pub in_service: Option<bool>,
    /// Whether the device hosts virtual machines
    pub is_virtual_host: Option<bool>,
    /// Operating system name
    pub os_name: Option<String>,
    /// Operating system version
    pub os_version: Option<String>,
    /// Operating system architecture
    pub os_architecture: Option<String>,
    /// Hardware model
    pub hw_model: Option<String>,
    /// Hardware manufacturer
    pub manufacturer: Option<String>,
    /// Number of CPU sockets
    pub cpu_count: Option<u32>,
    /// Cores per CPU
    pub cpu_cores: Option<u32>,
    /// CPU speed in MHz
    pub cpu_speed_mhz: Option<f64>,
    /// Memory in GB
    pub ram_gb: Option<f64>,
    /// Number of disks
    pub hdd_count: Option<u32>,
    /// Size of one disk in GB
    pub hdd_size_gb: Option<f64>,
    /// Building
    pub building: Option<String>,
    /// Room
    pub room: Option<String>,
    /// Rack
    pub rack: Option<String>,
    /// Customer / department
    pub customer: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Alternate names
    pub aliases: Vec<String>,
    /// Columns the projector does not know about, passed through as text
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
    /// IP addresses
    pub ip_addresses: Vec<IpAddress>,
    /// MAC addresses
    pub mac_addresses: Vec<MacAddress>,
    /// Disk details
    pub hdd_details: Vec<HddDetail>,
    /// Custom fields
    pub custom_fields: Vec<CustomField>,
    /// External links
    pub external_links: Vec<ExternalLink>,
    /// Purchase line items
    pub purchase_line_items: Vec<PurchaseLineItem>,
}

/// Value of a device attribute looked up by name
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// No such attribute on this device
    Missing,
    /// Known attribute without a value
    Null,
    /// Single value
    Text(String),
    /// Multi-valued attribute
    List(Vec<String>),
}

impl Attribute {
    /// All non-empty values of this attribute
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Attribute::Missing | Attribute::Null => Vec::new(),
            Attribute::Text(v) if v.trim().is_empty() => Vec::new(),
            Attribute::Text(v) => vec![v.clone()],
            Attribute::List(vs) => vs.iter().filter(|v| !v.trim().is_empty()).cloned().collect(),
        }
    }
}

fn text(value: Option<&String>) -> Attribute {
    value.map_or(Attribute::Null, |v| Attribute::Text(v.clone()))
}

fn display<T: ToString>(value: Option<T>) -> Attribute {
    value.map_or(Attribute::Null, |v| Attribute::Text(v.to_string()))
}

impl DeviceRecord {
    /// Serialized names of the typed fields; pass-through columns never use them
    pub const FIELDS: &'static [&'static str] = &[
        "device_id",
        "name",
        "serial_no",
        "asset_no",
        "uuid",
        "device_type",
        "virtual_subtype",
        "service_level",
        "in_service",
        "is_virtual_host",
        "os_name",
        "os_version",
        "os_architecture",
        "hw_model",
        "manufacturer",
        "cpu_count",
        "cpu_cores",
        "cpu_speed_mhz",
        "ram_gb",
        "hdd_count",
        "hdd_size_gb",
        "building",
        "room",
        "rack",
        "customer",
        "notes",
        "tags",
        "aliases",
        "ip_addresses",
        "mac_addresses",
        "hdd_details",
        "custom_fields",
        "external_links",
        "purchase_line_items",
    ];

    /// Create a device with no attributes and empty sub-collections
    #[must_use]
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            name: None,
            serial_no: None,
            asset_no: None,
            uuid: None,
            device_type: None,
            virtual_subtype: None,
            service_level: None,
            in_service: None,
            is_virtual_host: None,
            os_name: None,
            os_version: None,
            os_architecture: None,
            hw_model: None,
            manufacturer: None,
            cpu_count: None,
            cpu_cores: None,
            cpu_speed_mhz: None,
            ram_gb: None,
            hdd_count: None,
            hdd_size_gb: None,
            building: None,
            room: None,
            rack: None,
            customer: None,
            notes: None,
            tags: Vec::new(),
            aliases: Vec::new(),
            extra: BTreeMap::new(),
            ip_addresses: Vec::new(),
            mac_addresses: Vec::new(),
            hdd_details: Vec::new(),
            custom_fields: Vec::new(),
            external_links: Vec::new(),
            purchase_line_items: Vec::new(),
        }
    }

    /// Replace scalar attributes with those of `other`, keeping sub-collections
    pub fn overwrite_attributes(&mut self, other: DeviceRecord) {
        let ip_addresses = std::mem::take(&mut self.ip_addresses);
        let mac_addresses = std::mem::take(&mut self.mac_addresses);
        let hdd_details = std::mem::take(&mut self.hdd_details);
        let custom_fields = std::mem::take(&mut self.custom_fields);
        let external_links = std::mem::take(&mut self.external_links);
        let purchase_line_items = std::mem::take(&mut self.purchase_line_items);

        *self = DeviceRecord {
            ip_addresses,
            mac_addresses,
            hdd_details,
            custom_fields,
            external_links,
            purchase_line_items,
            ..other
        };
    }

    /// Look up an attribute by field name
    ///
    /// Accepts schema field names, passed-through columns, source column
    /// names the projector reads (`device_name`, `customer_name`, ...), and
    /// `custom_fields.<key>` for custom field values.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Attribute {
        match field {
            "device_id" | "id" | "device_pk" => Attribute::Text(self.device_id.to_string()),
            "name" => text(self.name.as_ref()),
            "serial_no" => text(self.serial_no.as_ref()),
            "asset_no" => text(self.asset_no.as_ref()),
            "uuid" => text(self.uuid.as_ref()),
            "device_type" | "type" => text(self.device_type.as_ref()),
            "virtual_subtype" => text(self.virtual_subtype.as_ref()),
            "service_level" => text(self.service_level.as_ref()),
            "in_service" => display(self.in_service),
            "is_virtual_host" => display(self.is_virtual_host),
            "os_name" | "os" => text(self.os_name.as_ref()),
            "os_version" => text(self.os_version.as_ref()),
            "os_architecture" => text(self.os_architecture.as_ref()),
            "hw_model" => text(self.hw_model.as_ref()),
            "manufacturer" => text(self.manufacturer.as_ref()),
            "cpu_count" => display(self.cpu_count),
            "cpu_cores" => display(self.cpu_cores),
            "cpu_speed_mhz" => display(self.cpu_speed_mhz),
            "ram_gb" => display(self.ram_gb),
            "hdd_count" => display(self.hdd_count),
            "hdd_size_gb" => display(self.hdd_size_gb),
            "building" => text(self.building.as_ref()),
            "room" => text(self.room.as_ref()),
            "rack" => text(self.rack.as_ref()),
            "customer" => text(self.customer.as_ref()),
            "notes" => text(self.notes.as_ref()),
            "tags" => Attribute::List(self.tags.clone()),
            "aliases" => Attribute::List(self.aliases.clone()),
            _ => {
                if let Some(key) = field.strip_prefix("custom_fields.") {
                    return self
                        .custom_fields
                        .iter()
                        .find(|cf| cf.key.as_deref() == Some(key))
                        .map_or(Attribute::Missing, |cf| text(cf.value.as_ref()));
                }
                if let Some(value) = self.extra.get(field) {
                    return Attribute::Text(value.clone());
                }
                match project::canonical_field(field) {
                    Some(canonical) if canonical != field => self.attribute(canonical),
                    _ => Attribute::Missing,
                }
            }
        }
    }

    /// First IP address, if any
    #[must_use]
    pub fn primary_ip(&self) -> Option<&str> {
        self.ip_addresses.iter().find_map(|ip| ip.ip.as_deref())
    }
}

// ============================================================================
// Sub-records
// ============================================================================

/// IP address assigned to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddress {
    /// Address
    pub ip: Option<String>,
    /// Label
    pub label: Option<String>,
    /// Subnet name or CIDR
    pub subnet: Option<String>,
    /// Address type (static, dhcp, ...)
    pub ip_type: Option<String>,
    /// MAC address the IP is bound to
    pub mac_address: Option<String>,
}

/// Network port with a hardware address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacAddress {
    /// Hardware address
    pub mac: Option<String>,
    /// Port name
    pub port_name: Option<String>,
    /// VLAN
    pub vlan: Option<String>,
}

/// Disk group installed in a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HddDetail {
    /// Number of identical disks
    pub hdd_count: Option<u32>,
    /// Size of one disk in GB
    pub size_gb: Option<f64>,
    /// Disk type (SSD, SATA, ...)
    pub hdd_type: Option<String>,
    /// RAID type
    pub raid_type: Option<String>,
    /// RAID group
    pub raid_group: Option<String>,
    /// Rotational speed
    pub rpm: Option<u32>,
    /// Manufacturer
    pub manufacturer: Option<String>,
    /// Description
    pub description: Option<String>,
}

/// Custom field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    /// Field key
    pub key: Option<String>,
    /// Field value
    pub value: Option<String>,
    /// Field type
    pub field_type: Option<String>,
    /// Notes
    pub notes: Option<String>,
}

/// External link attached to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    /// Target URL
    pub url: Option<String>,
    /// Notes
    pub notes: Option<String>,
}

/// Purchase or entitlement line item covering a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseLineItem {
    /// Purchase order id
    pub purchase_id: Option<String>,
    /// Order number
    pub order_no: Option<String>,
    /// Vendor
    pub vendor: Option<String>,
    /// Line type (device, contract, software, ...)
    pub line_type: Option<String>,
    /// Contract type (warranty, support, ...)
    pub contract_type: Option<String>,
    /// Quantity
    pub quantity: Option<u32>,
    /// Cost
    pub cost: Option<f64>,
    /// Start of the line item
    pub start_date: Option<NaiveDate>,
    /// End of the line item
    pub end_date: Option<NaiveDate>,
    /// Renewal date
    pub renew_date: Option<NaiveDate>,
    /// Notes
    pub notes: Option<String>,
}

// ============================================================================
// Aggregation result
// ============================================================================

/// Per detail kind join counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailStats {
    /// Rows seen
    pub rows: usize,
    /// Rows attached to a device
    pub attached: usize,
    /// Rows whose foreign key matched no device
    pub orphaned: usize,
    /// Rows without a usable foreign key
    pub malformed: usize,
}

/// Counters collected during aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationStats {
    /// Primary rows seen
    pub primary_rows: usize,
    /// Primary rows repeating an identifier already seen
    pub duplicate_ids: usize,
    /// Primary rows without a usable identifier
    pub malformed_rows: usize,
    /// Detail counters by kind
    pub details: BTreeMap<RecordKind, DetailStats>,
}

impl AggregationStats {
    /// Detail rows dropped for any reason
    #[must_use]
    pub fn dropped_detail_rows(&self) -> usize {
        self.details.values().map(|d| d.orphaned + d.malformed).sum()
    }
}

/// Terminal output of the aggregator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryResult {
    devices: Vec<DeviceRecord>,
    /// Number of devices
    pub total_count: usize,
    /// Join counters
    pub stats: AggregationStats,
    #[serde(skip)]
    index: HashMap<DeviceId, usize>,
}

impl InventoryResult {
    /// Build a result from devices in their final order
    #[must_use]
    pub fn new(devices: Vec<DeviceRecord>, stats: AggregationStats) -> Self {
        let index = devices
            .iter()
            .enumerate()
            .map(|(pos, d)| (d.device_id, pos))
            .collect();
        Self {
            total_count: devices.len(),
            devices,
            stats,
            index,
        }
    }

    /// Empty result
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), AggregationStats::default())
    }

    /// Devices in aggregation order
    #[must_use]
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Look up a device by id
    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.index.get(&id).map(|&pos| &self.devices[pos])
    }

    /// Number of devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.total_count
    }

    /// Whether there are no devices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_has_empty_collections() {
        let device = DeviceRecord::new(DeviceId(7));
        assert!(device.ip_addresses.is_empty());
        assert!(device.purchase_line_items.is_empty());
        assert_eq!(device.attribute("name"), Attribute::Null);
        assert_eq!(device.attribute("nonexistent"), Attribute::Missing);
    }

    #[test]
    fn test_overwrite_keeps_sub_collections() {
        let mut device = DeviceRecord::new(DeviceId(1));
        device.name = Some("old".to_string());
        device.ip_addresses.push(IpAddress {
            ip: Some("10.0.0.1".to_string()),
            label: None,
            subnet: None,
            ip_type: None,
            mac_address: None,
        });

        let mut replacement = DeviceRecord::new(DeviceId(1));
        replacement.name = Some("new".to_string());
        device.overwrite_attributes(replacement);

        assert_eq!(device.name.as_deref(), Some("new"));
        assert_eq!(device.primary_ip(), Some("10.0.0.1"));
    }

    #[test]
    fn test_custom_field_attribute() {
        let mut device = DeviceRecord::new(DeviceId(1));
        device.custom_fields.push(CustomField {
            key: Some("env".to_string()),
            value: Some("staging".to_string()),
            field_type: None,
            notes: None,
        });

        assert_eq!(
            device.attribute("custom_fields.env"),
            Attribute::Text("staging".to_string())
        );
        assert_eq!(device.attribute("custom_fields.owner"), Attribute::Missing);
    }

    #[test]
    fn test_source_column_names_resolve() {
        let mut device = DeviceRecord::new(DeviceId(1));
        device.name = Some("web-01".to_string());
        device.customer = Some("Acme".to_string());
        device.ram_gb = Some(2.0);

        assert_eq!(device.attribute("device_name"), Attribute::Text("web-01".to_string()));
        assert_eq!(device.attribute("customer_name"), Attribute::Text("Acme".to_string()));
        assert_eq!(device.attribute("total_ram"), Attribute::Text("2".to_string()));
        assert_eq!(device.attribute("pk"), Attribute::Text("1".to_string()));
        assert_eq!(device.attribute("serial_number"), Attribute::Null);
    }

    #[test]
    fn test_field_list_matches_serialization() {
        let value = serde_json::to_value(DeviceRecord::new(DeviceId(1))).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        let mut fields = DeviceRecord::FIELDS.to_vec();
        keys.sort_unstable();
        fields.sort_unstable();
        assert_eq!(keys, fields);

        for field in DeviceRecord::FIELDS {
            if let Some(canonical) = project::canonical_field(field) {
                assert_eq!(canonical, *field);
            }
        }
    }

    #[test]
    fn test_attribute_values_skip_blanks() {
        let list = Attribute::List(vec!["a".to_string(), " ".to_string(), "b".to_string()]);
        assert_eq!(list.values(), vec!["a".to_string(), "b".to_string()]);
        assert!(Attribute::Text("  ".to_string()).values().is_empty());
        assert!(Attribute::Missing.values().is_empty());
    }

    #[test]
    fn test_result_lookup_by_id() {
        let result = InventoryResult::new(
            vec![DeviceRecord::new(DeviceId(3)), DeviceRecord::new(DeviceId(1))],
            AggregationStats::default(),
        );
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(DeviceId(1)).map(|d| d.device_id), Some(DeviceId(1)));
        assert!(result.get(DeviceId(2)).is_none());
    }
}
