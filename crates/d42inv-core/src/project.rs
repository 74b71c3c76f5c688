//! Field projection from flat rows to typed records
//!
//! Every record kind has a table of target fields, each fed by a list of
//! accepted source column names. The first present, non-blank source wins.
//! Projection never fails: absent or unparsable values become `None`.

use chrono::NaiveDate;
use tracing::debug;

use crate::record::{DeviceId, FlatRecord, RecordKind};
use crate::types::{
    CustomField, DeviceRecord, ExternalLink, HddDetail, IpAddress, MacAddress, PurchaseLineItem,
};

/// Accepted source columns for the device primary key
pub const DEVICE_ID_FIELDS: &[&str] = &["device_pk", "device_id", "id", "pk"];

const NAME: &[&str] = &["name", "device_name"];
const SERIAL_NO: &[&str] = &["serial_no", "serial_number", "serial"];
const ASSET_NO: &[&str] = &["asset_no", "asset_number"];
const UUID: &[&str] = &["uuid"];
const DEVICE_TYPE: &[&str] = &["device_type", "type"];
const VIRTUAL_SUBTYPE: &[&str] = &["virtual_subtype"];
const SERVICE_LEVEL: &[&str] = &["service_level"];
const IN_SERVICE: &[&str] = &["in_service"];
const VIRTUAL_HOST: &[&str] = &["is_it_virtual_host", "is_virtual_host", "virtual_host"];
const OS_NAME: &[&str] = &["os_name", "os"];
const OS_VERSION: &[&str] = &["os_version", "osver"];
const OS_ARCH: &[&str] = &["os_architecture", "osarch"];
const HW_MODEL: &[&str] = &["hw_model", "hardware"];
const MANUFACTURER: &[&str] = &["manufacturer", "vendor"];
const CPU_COUNT: &[&str] = &["cpu_count", "cpucount"];
const CPU_CORES: &[&str] = &["cpu_cores", "cpu_core", "cpucore"];
const CPU_SPEED: &[&str] = &["cpu_speed", "cpu_speed_mhz", "cpuspeed"];
const RAM: &[&str] = &["ram", "total_ram"];
const RAM_UNIT: &[&str] = &["ram_size_type", "ram_unit"];
const HDD_COUNT: &[&str] = &["hdd_count", "hddcount"];
const HDD_SIZE: &[&str] = &["hdd_size", "hddsize"];
const HDD_UNIT: &[&str] = &["hdd_size_type", "hdd_unit"];
const BUILDING: &[&str] = &["building"];
const ROOM: &[&str] = &["room"];
const RACK: &[&str] = &["rack"];
const CUSTOMER: &[&str] = &["customer", "customer_name"];
const NOTES: &[&str] = &["notes"];
const TAGS: &[&str] = &["tags"];
const ALIASES: &[&str] = &["aliases", "alias"];

// Nested collections returned by the bulk device endpoint; joined separately.
// Both the documented and the older key spellings are listed.
const NESTED: &[&str] = &[
    "ip_addresses",
    "mac_addresses",
    "hdd_details",
    "custom_fields",
    "device_external_links",
    "external_links",
    "device_purchase_line_items",
    "purchaseline_items",
    "purchase_line_items",
];

// Unit columns qualify a size; they feed no field of their own.
const UNIT_COLUMNS: &[&[&str]] = &[RAM_UNIT, HDD_UNIT];

/// Source columns read by the device projection, by target field
const DEVICE_COLUMNS: &[(&str, &[&str])] = &[
    ("device_id", DEVICE_ID_FIELDS),
    ("name", NAME),
    ("serial_no", SERIAL_NO),
    ("asset_no", ASSET_NO),
    ("uuid", UUID),
    ("device_type", DEVICE_TYPE),
    ("virtual_subtype", VIRTUAL_SUBTYPE),
    ("service_level", SERVICE_LEVEL),
    ("in_service", IN_SERVICE),
    ("is_virtual_host", VIRTUAL_HOST),
    ("os_name", OS_NAME),
    ("os_version", OS_VERSION),
    ("os_architecture", OS_ARCH),
    ("hw_model", HW_MODEL),
    ("manufacturer", MANUFACTURER),
    ("cpu_count", CPU_COUNT),
    ("cpu_cores", CPU_CORES),
    ("cpu_speed_mhz", CPU_SPEED),
    ("ram_gb", RAM),
    ("hdd_count", HDD_COUNT),
    ("hdd_size_gb", HDD_SIZE),
    ("building", BUILDING),
    ("room", ROOM),
    ("rack", RACK),
    ("customer", CUSTOMER),
    ("notes", NOTES),
    ("tags", TAGS),
    ("aliases", ALIASES),
];

/// Device field fed by a source column, e.g. `customer_name` → `customer`
#[must_use]
pub fn canonical_field(column: &str) -> Option<&'static str> {
    DEVICE_COLUMNS
        .iter()
        .find(|(_, columns)| columns.contains(&column))
        .map(|(field, _)| *field)
}

/// Whether a column is consumed by the device projection or would shadow a
/// device field, and so must not be passed through
fn is_reserved(column: &str) -> bool {
    canonical_field(column).is_some()
        || UNIT_COLUMNS.iter().any(|units| units.contains(&column))
        || NESTED.contains(&column)
        || DeviceRecord::FIELDS.contains(&column)
}

/// Typed projection of one flat row
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedRecord {
    /// Device row
    Device(Box<DeviceRecord>),
    /// Device row without a usable primary key
    UnidentifiedDevice,
    /// IP address row
    IpAddress(IpAddress),
    /// MAC address row
    MacAddress(MacAddress),
    /// Disk row
    HddDetail(HddDetail),
    /// Custom field row
    CustomField(CustomField),
    /// External link row
    ExternalLink(ExternalLink),
    /// Purchase line item row
    PurchaseLineItem(PurchaseLineItem),
}

/// Project a flat row of the given kind
#[must_use]
pub fn project(raw: &FlatRecord, kind: RecordKind) -> ProjectedRecord {
    match kind {
        RecordKind::Device => match device_id(raw, DEVICE_ID_FIELDS) {
            Some(id) => ProjectedRecord::Device(Box::new(project_device(raw, id))),
            None => ProjectedRecord::UnidentifiedDevice,
        },
        RecordKind::IpAddress => ProjectedRecord::IpAddress(project_ip(raw)),
        RecordKind::MacAddress => ProjectedRecord::MacAddress(project_mac(raw)),
        RecordKind::HddDetail => ProjectedRecord::HddDetail(project_hdd(raw)),
        RecordKind::CustomField => ProjectedRecord::CustomField(project_custom_field(raw)),
        RecordKind::ExternalLink => ProjectedRecord::ExternalLink(project_link(raw)),
        RecordKind::PurchaseLineItem => ProjectedRecord::PurchaseLineItem(project_line_item(raw)),
    }
}

/// Device identifier from the first matching column
#[must_use]
pub fn device_id(raw: &FlatRecord, fields: &[&str]) -> Option<DeviceId> {
    let value = pick(raw, fields)?;
    match value.parse::<DeviceId>() {
        Ok(id) => Some(id),
        Err(_) => {
            // JSON sources sometimes render integer keys as floats
            let float: f64 = value.parse().ok()?;
            (float >= 0.0 && float.fract() == 0.0).then(|| DeviceId(float as u64))
        }
    }
}

fn project_device(raw: &FlatRecord, id: DeviceId) -> DeviceRecord {
    let mut device = DeviceRecord::new(id);

    device.name = owned(raw, NAME);
    device.serial_no = owned(raw, SERIAL_NO);
    device.asset_no = owned(raw, ASSET_NO);
    device.uuid = owned(raw, UUID);
    device.device_type = owned(raw, DEVICE_TYPE);
    device.virtual_subtype = owned(raw, VIRTUAL_SUBTYPE);
    device.service_level = owned(raw, SERVICE_LEVEL);
    device.in_service = pick(raw, IN_SERVICE).and_then(parse_bool);
    device.is_virtual_host = pick(raw, VIRTUAL_HOST).and_then(parse_bool);
    device.os_name = owned(raw, OS_NAME);
    device.os_version = owned(raw, OS_VERSION);
    device.os_architecture = owned(raw, OS_ARCH);
    device.hw_model = owned(raw, HW_MODEL);
    device.manufacturer = owned(raw, MANUFACTURER);
    device.cpu_count = pick(raw, CPU_COUNT).and_then(parse_u32);
    device.cpu_cores = pick(raw, CPU_CORES).and_then(parse_u32);
    device.cpu_speed_mhz = pick(raw, CPU_SPEED).and_then(parse_f64);
    device.ram_gb = sized(raw, RAM, RAM_UNIT, SizeUnit::parse_ram);
    device.hdd_count = pick(raw, HDD_COUNT).and_then(parse_u32);
    device.hdd_size_gb = sized(raw, HDD_SIZE, HDD_UNIT, SizeUnit::parse_disk);
    device.building = owned(raw, BUILDING);
    device.room = owned(raw, ROOM);
    device.rack = owned(raw, RACK);
    device.customer = owned(raw, CUSTOMER);
    device.notes = owned(raw, NOTES);
    device.tags = split_list(pick(raw, TAGS));
    device.aliases = split_list(pick(raw, ALIASES));

    for (field, value) in raw.iter() {
        if is_reserved(field) {
            continue;
        }
        if let Some(value) = value {
            device.extra.insert(field.to_string(), value.to_string());
        }
    }

    device
}

fn project_ip(raw: &FlatRecord) -> IpAddress {
    IpAddress {
        ip: owned(raw, &["ip_address", "ip"]),
        label: owned(raw, &["label"]),
        subnet: owned(raw, &["subnet", "subnet_name", "network"]),
        ip_type: owned(raw, &["ip_type", "type"]),
        mac_address: owned(raw, &["mac_address", "macaddress", "hwaddress"]),
    }
}

fn project_mac(raw: &FlatRecord) -> MacAddress {
    MacAddress {
        mac: owned(raw, &["mac", "mac_address", "macaddress", "hwaddress"]),
        port_name: owned(raw, &["port_name", "port", "name"]),
        vlan: owned(raw, &["vlan", "vlans"]),
    }
}

fn project_hdd(raw: &FlatRecord) -> HddDetail {
    HddDetail {
        hdd_count: pick(raw, &["hdd_count", "count"]).and_then(parse_u32),
        size_gb: sized(
            raw,
            &["hdd_size", "size"],
            &["hdd_size_type", "size_type", "unit"],
            SizeUnit::parse_disk,
        ),
        hdd_type: owned(raw, &["hdd_type", "type"]),
        raid_type: owned(raw, &["raid_type"]),
        raid_group: owned(raw, &["raid_group"]),
        rpm: pick(raw, &["rpm"]).and_then(parse_u32),
        manufacturer: owned(raw, &["manufacturer", "vendor"]),
        description: owned(raw, &["description", "hdd_description", "notes"]),
    }
}

fn project_custom_field(raw: &FlatRecord) -> CustomField {
    CustomField {
        key: owned(raw, &["key", "custom_field_key"]),
        value: owned(raw, &["value", "custom_field_value"]),
        field_type: owned(raw, &["field_type", "type"]),
        notes: owned(raw, &["notes"]),
    }
}

fn project_link(raw: &FlatRecord) -> ExternalLink {
    ExternalLink {
        url: owned(raw, &["url", "link"]),
        notes: owned(raw, &["notes", "description"]),
    }
}

fn project_line_item(raw: &FlatRecord) -> PurchaseLineItem {
    PurchaseLineItem {
        purchase_id: owned(raw, &["purchase_id", "purchase_fk", "purchase_pk"]),
        order_no: owned(raw, &["order_no", "po_number"]),
        vendor: owned(raw, &["vendor", "vendor_name"]),
        line_type: owned(raw, &["line_type", "line_item_type"]),
        contract_type: owned(raw, &["contract_type", "line_contract_type"]),
        quantity: pick(raw, &["quantity", "line_quantity"]).and_then(parse_u32),
        cost: pick(raw, &["cost", "line_cost"]).and_then(parse_f64),
        start_date: pick(raw, &["start_date", "line_start_date"]).and_then(parse_date),
        end_date: pick(raw, &["end_date", "line_end_date"]).and_then(parse_date),
        renew_date: pick(raw, &["renew_date", "line_renew_date"]).and_then(parse_date),
        notes: owned(raw, &["notes"]),
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// First present, non-blank value among `fields`, trimmed
#[must_use]
pub fn pick<'a>(raw: &'a FlatRecord, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| raw.get(f))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

fn owned(raw: &FlatRecord, fields: &[&str]) -> Option<String> {
    pick(raw, fields).map(str::to_string)
}

/// Three-state boolean from the usual string encodings
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "t" | "1" | "on" => Some(true),
        "false" | "no" | "n" | "f" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Split a comma-joined value; blank input gives an empty list
#[must_use]
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse().ok().filter(|v: &f64| v.is_finite())
}

fn parse_u32(value: &str) -> Option<u32> {
    let value = value.trim();
    value.parse().ok().or_else(|| {
        let float: f64 = value.parse().ok()?;
        (float >= 0.0 && float.fract() == 0.0 && float <= f64::from(u32::MAX))
            .then_some(float as u32)
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let date = value.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Size units accepted for memory and disk capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    /// Megabytes
    Mb,
    /// Gigabytes
    Gb,
    /// Terabytes
    Tb,
    /// Petabytes
    Pb,
}

impl SizeUnit {
    /// Multiplier converting this unit to GB
    #[must_use]
    pub fn gb_factor(self) -> f64 {
        match self {
            SizeUnit::Mb => 1.0 / 1024.0,
            SizeUnit::Gb => 1.0,
            SizeUnit::Tb => 1024.0,
            SizeUnit::Pb => 1024.0 * 1024.0,
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        match unit.trim().to_ascii_uppercase().as_str() {
            "MB" | "M" | "MIB" => Some(SizeUnit::Mb),
            "GB" | "G" | "GIB" => Some(SizeUnit::Gb),
            "TB" | "T" | "TIB" => Some(SizeUnit::Tb),
            "PB" | "P" | "PIB" => Some(SizeUnit::Pb),
            _ => None,
        }
    }

    /// Memory units (MB, GB, TB)
    #[must_use]
    pub fn parse_ram(unit: &str) -> Option<Self> {
        Self::parse(unit).filter(|u| *u != SizeUnit::Pb)
    }

    /// Disk units (MB, GB, TB, PB)
    #[must_use]
    pub fn parse_disk(unit: &str) -> Option<Self> {
        Self::parse(unit)
    }
}

/// Convert a sized value to GB; a missing unit means the value is already GB
#[must_use]
pub fn to_gb(value: f64, unit: Option<SizeUnit>) -> f64 {
    value * unit.unwrap_or(SizeUnit::Gb).gb_factor()
}

fn sized(
    raw: &FlatRecord,
    value_fields: &[&str],
    unit_fields: &[&str],
    parse_unit: fn(&str) -> Option<SizeUnit>,
) -> Option<f64> {
    let value = pick(raw, value_fields).and_then(parse_f64)?;
    match pick(raw, unit_fields) {
        None => Some(to_gb(value, None)),
        Some(unit) => match parse_unit(unit) {
            Some(unit) => Some(to_gb(value, Some(unit))),
            None => {
                debug!(unit, "unknown size unit, dropping value");
                None
            }
        },
    }
}
